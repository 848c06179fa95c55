use bnb4_core::ModelCatalog;
use console::Style;

/// Print the catalog grouped the way the model picker shows it.
pub fn list_models(catalog: &ModelCatalog) {
    let style_group = Style::new().bold();
    let style_dim = Style::new().dim();

    for group in catalog.groups() {
        println!("{}", style_group.apply_to(&group.name));
        for entry in &group.entries {
            let source = if entry.is_custom() {
                "(enter with --source)"
            } else {
                entry.source.as_str()
            };
            println!(
                "  {:<32} {:>5}  {:<6}  {}",
                entry.display_name, entry.params, entry.modality, source
            );
            println!("  {}", style_dim.apply_to(&entry.description));
        }
        println!();
    }
}
