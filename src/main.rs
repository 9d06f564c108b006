use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ghostlink::sessions::SceneObject;
use ghostlink::{
    init_logging, Config, ControlSession, OutputFormat, ScanSession, SessionContext,
    SessionObserver, SlicingSession, StatusFrame, UsbConfigSession, WebSocketConnector,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "ghostlink",
    version,
    about = "Talk to the device-control daemon of printers, laser cutters and scanners"
)]
struct Cli {
    /// Configuration file (JSON or TOML)
    #[arg(long, value_name = "FILE", env = "GHOSTLINK_CONFIG")]
    config: Option<PathBuf>,
    /// Daemon host, overrides the configuration
    #[arg(long, value_name = "HOST")]
    host: Option<String>,
    /// Daemon port, overrides the configuration
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,
    /// RSA public key (PEM) sent to session endpoints
    #[arg(long, value_name = "PEM", env = "GHOSTLINK_KEY")]
    key: Option<PathBuf>,
    /// Verbose logging
    #[arg(long, short)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List a directory on the device
    Ls {
        device: String,
        #[arg(default_value = "SD")]
        path: String,
    },
    /// Upload a file and start printing it
    Print { device: String, file: PathBuf },
    /// Flash main firmware
    Firmware {
        device: String,
        file: PathBuf,
        /// Flash the toolhead instead of the main board
        #[arg(long)]
        toolhead: bool,
    },
    /// Slice a model on the daemon
    Slice {
        model: PathBuf,
        /// Output format (g or f)
        #[arg(long, short, value_name = "FORMAT", default_value = "f", value_parser = parse_format)]
        format: OutputFormat,
        /// Object placement as JSON
        #[arg(long, value_name = "JSON")]
        transform: Option<String>,
        /// Slicing parameter, repeatable
        #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_parameter)]
        parameters: Vec<(String, String)>,
        /// Where to write the sliced file
        #[arg(long, short, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Capture a point cloud
    Scan {
        device: String,
        /// Number of scan cycles
        #[arg(long, short, value_name = "N", default_value_t = 400)]
        resolution: u32,
        /// Where to write the points (x y z r g b per line)
        #[arg(long, short, value_name = "FILE")]
        out: PathBuf,
    },
    /// List access points visible to a USB-attached machine
    Wifi {
        /// Serial port, discovered when omitted
        #[arg(long, value_name = "PORT")]
        port: Option<String>,
    },
}

fn parse_format(s: &str) -> std::result::Result<OutputFormat, String> {
    s.parse()
}

fn parse_parameter(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))
}

/// Reports session progress through tracing
struct LogObserver;

impl SessionObserver for LogObserver {
    fn on_progress(&self, step: usize, total: usize) {
        tracing::info!("Progress {}/{}", step, total);
    }

    fn on_ready(&self) {
        tracing::info!("Device ready");
    }

    fn on_error(&self, payload: &StatusFrame) {
        tracing::error!("Device error: {}", payload);
    }

    fn on_status(&self, frame: &StatusFrame) {
        tracing::debug!("Status: {}", frame);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(host) = &cli.host {
        config.connection.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.replace(' ', "_"))
        .with_context(|| format!("no file name in {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    init_logging(level)?;
    tracing::debug!("ghostlink {} built {}", ghostlink::VERSION, ghostlink::BUILD_DATE);

    let config = load_config(&cli)?;
    let mut ctx = SessionContext::new(config, Arc::new(WebSocketConnector::new()))
        .with_observer(Arc::new(LogObserver));
    if let Some(path) = &cli.key {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("reading key {}", path.display()))?;
        ctx = ctx.with_key(pem);
    }

    match cli.command {
        Commands::Ls { device, path } => {
            let session = ControlSession::connect(&ctx, &device).await?;
            let listing = session.ls(&path).await;
            session.close();
            println!("{}", serde_json::to_string_pretty(&listing?.to_value())?);
        }
        Commands::Print { device, file } => {
            let payload = read(&file)?;
            let session = ControlSession::connect(&ctx, &device).await?;
            let job = session.print(&payload).await;
            session.close();
            println!("{}", job?.started());
        }
        Commands::Firmware {
            device,
            file,
            toolhead,
        } => {
            let payload = read(&file)?;
            let session = ControlSession::connect(&ctx, &device).await?;
            let result = if toolhead {
                session.update_toolhead(&payload).await
            } else {
                session.update_firmware(&payload).await
            };
            session.close();
            println!("{}", result?);
        }
        Commands::Slice {
            model,
            format,
            transform,
            parameters,
            out,
        } => {
            let data = read(&model)?;
            let name = file_name(&model)?;
            let transform = match transform {
                Some(json) => serde_json::from_str(&json).context("parsing --transform")?,
                None => Default::default(),
            };
            let object = SceneObject { name, transform };

            let session = SlicingSession::open(&ctx)?;
            let artifact = async {
                session.upload(&object.name, &data).await?;
                session.render(&[object], None, &parameters, format).await
            }
            .await;
            session.close();
            let artifact = artifact?;

            for warning in &artifact.warnings {
                tracing::warn!("Slicer: {}", warning);
            }
            let out = out.unwrap_or_else(|| model.with_extension(format.extension()));
            std::fs::write(&out, &artifact.data)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("{} bytes of {} written to {}", artifact.data.len(), format, out.display());
        }
        Commands::Scan {
            device,
            resolution,
            out,
        } => {
            let session = ScanSession::open(&ctx, &device)?;
            let cloud = session.scan(resolution).await;
            session.close().await;
            let cloud = cloud?;

            let file = std::fs::File::create(&out)
                .with_context(|| format!("creating {}", out.display()))?;
            cloud.write_xyz(std::io::BufWriter::new(file))?;
            println!("{} points written to {}", cloud.len(), out.display());
        }
        Commands::Wifi { port } => {
            let session = UsbConfigSession::open(&ctx)?;
            let networks = async {
                match port {
                    Some(port) => session.connect(&port).await?,
                    None => session.discover().await?,
                };
                session.scan_wifi().await
            }
            .await;
            session.close();
            println!("{}", serde_json::to_string_pretty(&networks?)?);
        }
    }

    Ok(())
}
