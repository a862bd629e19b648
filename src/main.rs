use anyhow::{Context, Result};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};
use wasm_dylink_tools::{
    dump,
    emscripten::{add_emscripten_metadata, update_dylink_section, EmscriptenMetadata},
    get_args, CmdConfig, Command,
};

fn main() -> Result<()> {
    let config = get_args()?;
    init_tracing(&config);

    match config.command {
        Command::AddMetadata { file, initial_memory, global_base, standalone_wasm } => {
            let metadata = EmscriptenMetadata::from_initial_memory(
                initial_memory,
                global_base,
                standalone_wasm,
            )
            .with_context(|| format!("initial memory {initial_memory} is too large"))?;
            add_emscripten_metadata(&file, &metadata)
        }
        Command::UpdateDylink { file, needed } => update_dylink_section(&file, &needed[..]),
        Command::Dump { file } => dump(&file, &mut std::io::stdout().lock()),
    }
}

fn init_tracing(config: &CmdConfig) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(!config.disable_ansi_color)
                .with_writer(std::io::stderr)
                .with_filter(LevelFilter::from_level(config.log_level)),
        )
        .with(ErrorLayer::default())
        .init();
}
