use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bnb4_core::config::UiConfig;
use bnb4_core::ui::TimestampedSink;
use bnb4_core::{
    ConverterBuilder, ConverterController, ConverterError, Device, FormState, JobOutcome,
    LogSink, ModelCatalog, QuantType, CONTEXT_LENGTHS,
};
use clap::Args;
use console::Style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use inquire::{Confirm, Select, Text};

use super::setup::prepare_environment;
use crate::sink::ProgressBarSink;

/// Exit code of a run stopped with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

/// Ctrl-C presses seen by the relay loop.
struct Interrupts {
    pressed: Arc<AtomicBool>,
    cancelling: bool,
}

impl Interrupts {
    fn new(pressed: Arc<AtomicBool>) -> Self {
        Self {
            pressed,
            cancelling: false,
        }
    }

    fn install() -> anyhow::Result<Self> {
        let pressed = Arc::new(AtomicBool::new(false));
        let handler_flag = pressed.clone();
        ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))?;
        Ok(Self::new(pressed))
    }

    /// True once, for the first press of the run. Later presses are
    /// swallowed while the job winds down.
    fn cancel_requested(&mut self) -> bool {
        if !self.pressed.swap(false, Ordering::SeqCst) || self.cancelling {
            return false;
        }
        self.cancelling = true;
        true
    }
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Catalog model to convert, as listed by `bnb4 models`
    #[arg(short, long)]
    pub model: Option<String>,

    /// Repository id or URL (selects the custom model when --model is absent)
    #[arg(short, long)]
    pub source: Option<String>,

    /// Directory the converted model folder is created in
    #[arg(short, long)]
    pub output: Option<String>,

    /// auto, gpu or cpu
    #[arg(long)]
    pub device: Option<String>,

    /// Tokenizer maximum length
    #[arg(long)]
    pub context: Option<u32>,

    /// nf4 or fp4
    #[arg(long)]
    pub quant: Option<String>,

    /// Save pickle weights instead of safetensors
    #[arg(long)]
    pub unsafe_serialization: bool,

    /// Fill in the form with prompts
    #[arg(short, long)]
    pub interactive: bool,
}

/// Apply command-line values on top of the saved form.
fn apply_args(
    form: &mut FormState,
    catalog: &ModelCatalog,
    args: &ConvertArgs,
) -> bnb4_core::Result<()> {
    let model = match (&args.model, &args.source) {
        (Some(model), _) => Some(model.clone()),
        (None, Some(_)) => catalog
            .entries()
            .find(|entry| entry.is_custom())
            .map(|entry| entry.display_name.clone()),
        (None, None) => None,
    };
    if let Some(model) = model {
        if !form.select_model(catalog, &model) {
            return Err(ConverterError::Validation {
                field: "model".to_string(),
                message: format!("unknown model {:?}, see `bnb4 models`", model),
            });
        }
    }
    if let Some(source) = &args.source {
        form.set_source(source)?;
    }
    if let Some(output) = &args.output {
        form.output_path = output.clone();
    }
    if let Some(device) = &args.device {
        form.device = Device::parse(device).ok_or_else(|| ConverterError::InvalidParams {
            message: format!("invalid device {:?}, expected auto, gpu or cpu", device),
        })?;
    }
    if let Some(context) = args.context {
        form.set_context_length(context)?;
    }
    if let Some(quant) = &args.quant {
        form.quant_type = QuantType::parse(quant).ok_or_else(|| ConverterError::InvalidParams {
            message: format!("invalid quantization type {:?}, expected nf4 or fp4", quant),
        })?;
    }
    if args.unsafe_serialization {
        form.safe_serialization = false;
    }
    Ok(())
}

/// Walk through the form with terminal prompts.
fn prompt_form(controller: &ConverterController) -> anyhow::Result<()> {
    let catalog = controller.catalog();
    let labels = catalog.choice_labels();

    loop {
        let current = controller.form();
        let cursor = labels
            .iter()
            .position(|label| *label == current.choice)
            .unwrap_or(0);
        let label = Select::new("Model", labels.clone())
            .with_starting_cursor(cursor)
            .with_page_size(20)
            .prompt()?;
        if controller.select_model(&label) {
            break;
        }
        println!("{}", Style::new().dim().apply_to("Pick a model, not a group header."));
    }

    let form = controller.form();
    if form.source_editable {
        let source = Text::new("Model URL or repository id")
            .with_initial_value(&form.source)
            .prompt()?;
        controller.update_form(|form, _| form.set_source(&source))?;
    } else {
        println!("  {}", Style::new().dim().apply_to(&form.info));
    }

    let cursor = CONTEXT_LENGTHS
        .iter()
        .position(|length| *length == form.context_length)
        .unwrap_or(0);
    let context = Select::new("Context length", CONTEXT_LENGTHS.to_vec())
        .with_starting_cursor(cursor)
        .prompt()?;

    let cursor = Device::ALL
        .iter()
        .position(|device| *device == form.device)
        .unwrap_or(0);
    let device = Select::new("Device", Device::ALL.to_vec())
        .with_starting_cursor(cursor)
        .prompt()?;

    let output = Text::new("Output directory")
        .with_initial_value(&form.output_path)
        .prompt()?;
    let safe = Confirm::new("Save as safetensors?")
        .with_default(form.safe_serialization)
        .prompt()?;

    controller.update_form(|form, _| {
        form.set_context_length(context)?;
        form.device = device;
        form.output_path = output;
        form.safe_serialization = safe;
        Ok(())
    })?;
    Ok(())
}

fn print_form(form: &FormState) {
    let style_label = Style::new().bold();
    println!("{} {}", style_label.apply_to("Model: "), form.choice.trim());
    println!("{} {}", style_label.apply_to("Source:"), form.source);
    println!("{} {}", style_label.apply_to("Output:"), form.output_path);
    println!(
        "{} {} | context {} | {} | {}",
        style_label.apply_to("Config:"),
        form.device,
        form.context_length,
        form.quant_type,
        if form.safe_serialization {
            "safetensors"
        } else {
            "pickle"
        }
    );
}

fn progress_bar() -> anyhow::Result<ProgressBar> {
    let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::hidden());
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("=> "),
    );
    Ok(bar)
}

pub async fn handle_convert(
    builder: ConverterBuilder,
    args: ConvertArgs,
) -> anyhow::Result<ExitCode> {
    let bar = progress_bar()?;
    let sink = TimestampedSink::new(ProgressBarSink::new(bar.clone()));
    let converter = builder.sink(Arc::new(sink) as Arc<dyn LogSink>).build()?;
    let controller = converter.controller.clone();

    controller.update_form(|form, catalog| apply_args(form, catalog, &args))?;
    if args.interactive {
        prompt_form(&controller)?;
    }
    print_form(&controller.form());

    prepare_environment(&converter).await?;

    let mut interrupts = Interrupts::install()?;

    controller.start()?;
    bar.set_draw_target(ProgressDrawTarget::stderr());
    bar.enable_steady_tick(UiConfig::POLL_INTERVAL);

    let mut ticker = tokio::time::interval(UiConfig::POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if interrupts.cancel_requested() && controller.cancel() {
            bar.println(
                Style::new()
                    .yellow()
                    .apply_to("Cancelling, waiting for the current step to stop...")
                    .to_string(),
            );
        }

        controller.tick();
        let view = controller.view();
        bar.set_position(u64::from(view.progress));
        bar.set_message(view.status.text.clone());
        if !view.is_running() {
            break;
        }
    }
    bar.finish_and_clear();

    let view = controller.view();
    let output_dir = controller
        .form()
        .to_job_config(controller.catalog())
        .output_dir();
    controller.shutdown().await;

    let (style, code) = match view.outcome {
        Some(JobOutcome::Completed) => (Style::new().green().bold(), ExitCode::SUCCESS),
        Some(JobOutcome::Cancelled) => (Style::new().yellow(), ExitCode::from(EXIT_CANCELLED)),
        _ => (Style::new().red().bold(), ExitCode::FAILURE),
    };
    println!("{}", style.apply_to(&view.status.text));
    if view.outcome == Some(JobOutcome::Completed) {
        println!("Saved to {}", output_dir.display());
    }
    Ok(code)
}
