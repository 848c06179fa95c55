use std::time::Duration;

use bnb4_core::Converter;
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner
}

/// Create the venv and install the model libraries unless already present.
pub async fn prepare_environment(converter: &Converter) -> anyhow::Result<()> {
    let message = if converter.environment.is_ready() {
        "Checking Python environment..."
    } else {
        "Preparing Python environment (the first run can take several minutes)..."
    };
    let spinner = spinner(message);
    let result = converter.environment.ensure().await;
    spinner.finish_and_clear();
    Ok(result?)
}

pub async fn handle_setup(converter: Converter) -> anyhow::Result<()> {
    prepare_environment(&converter).await?;
    let status = converter.environment.status();
    println!(
        "{} {}",
        Style::new().green().apply_to("Environment ready:"),
        status.interpreter
    );
    Ok(())
}

pub async fn handle_info(converter: &Converter) {
    let style_heading = Style::new().bold();

    println!("{}", style_heading.apply_to("System"));
    for line in converter.controller.system_info().await.summary().lines() {
        println!("  {}", line);
    }

    let status = converter.environment.status();
    println!();
    println!("{}", style_heading.apply_to("Python environment"));
    println!("  Ready:        {}", status.ready);
    println!("  Interpreter:  {}", status.interpreter);
    if status.overridden {
        println!("  (interpreter overridden)");
    } else {
        println!("  Venv:         {}", status.venv_dir);
    }
    println!("  Scripts:      {}", if status.scripts_deployed { "deployed" } else { "missing" });
    println!(
        "  Settings:     {}",
        converter.controller.settings_store().path().display()
    );
}
