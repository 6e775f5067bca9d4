#[macro_use]
extern crate tracing;

use std::path::PathBuf;

use color_eyre::eyre::{eyre, WrapErr};
use structopt::StructOpt;
use tokio::runtime::Builder;
use tokio::signal;

use blestrip::{
    accessory::Accessory, device, global::GlobalData, models::Config, servers, solar::SolarClock,
};

#[derive(Debug, StructOpt)]
struct Opts {
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u32,
    #[structopt(short, long = "config")]
    config_path: Option<PathBuf>,
    #[structopt(long)]
    dump_config: bool,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("blestrip").join("config.toml"))
}

async fn run(opts: Opts) -> color_eyre::eyre::Result<()> {
    // Load configuration
    let config_path = opts
        .config_path
        .or_else(default_config_path)
        .ok_or_else(|| eyre!("no configuration directory, use --config"))?;

    let config = Config::load_file(&config_path)
        .await
        .wrap_err_with(|| format!("loading {}", config_path.display()))?;

    // Dump configuration if this was asked
    if opts.dump_config {
        print!("{}", config.to_string()?);
        return Ok(());
    }

    info!(version = %blestrip::version(), config = %config_path.display(), "starting");

    // Create the global state object
    let global = GlobalData::new(&config).wrap();

    // Open the radio
    let transport = device::build_transport(&config.transport).await?;
    let solar = SolarClock::new(config.location);

    // Initialize and spawn the accessories, before any transport event is dispatched
    for accessory in &config.accessories {
        let (accessory, handle) = Accessory::new(
            global.clone(),
            accessory.clone(),
            transport.clone(),
            Box::new(solar.clone()),
        )
        .await;

        let name = handle.name().to_owned();
        global.register_accessory(handle).await;

        tokio::spawn({
            let global = global.clone();

            async move {
                let result = accessory.run().await;

                if let Err(error) = result {
                    error!(accessory = %name, error = %error, "accessory error");
                }

                global.unregister_accessory(&name).await;
            }
        });
    }

    // Fan out transport events
    let events = transport.events().await?;
    let _dispatcher = tokio::spawn({
        let global = global.clone();
        async move { global.dispatch(events).await }
    });

    // Start the JSON server
    let _json_server = if config.json_server.enable {
        Some(
            servers::bind(
                "JSON",
                config.json_server.clone(),
                global.clone(),
                servers::json::handle_client,
            )
            .await?,
        )
    } else {
        None
    };

    signal::ctrl_c().await?;
    info!("shutting down");

    for handle in global.accessories().await {
        // ok: the accessory may already be gone
        handle.stop().await.ok();
    }

    Ok(())
}

fn install_tracing(opts: &Opts) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let fmt_layer = fmt::layer();

    let filter_layer = EnvFilter::try_from_env("BLESTRIP_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match opts.verbose {
            0 => "blestrip=warn,blestripd=warn",
            1 => "blestrip=info,blestripd=info",
            2 => "blestrip=debug,blestripd=debug",
            _ => "blestrip=trace,blestripd=trace",
        })
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
}

#[paw::main]
fn main(opts: Opts) -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    install_tracing(&opts)?;

    // Create tokio runtime
    let thd_count = match num_cpus::get() {
        1 => 2,
        other => other.min(4),
    };

    let rt = Builder::new_multi_thread()
        .worker_threads(thd_count)
        .enable_all()
        .build()?;
    rt.block_on(run(opts))
}
