mod compose;
mod config;
mod error;
mod logging;
mod pdf;
mod pipeline;
mod qr;
mod server;
mod template;

use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use compose::{QR_TOP_OFFSET, composite, qr_placement};
use config::{LoggingConfig, Settings};
use pdf::{CaptionFonts, FallbackFont};
use pipeline::Pipeline;
use qr::QrEncoder;
use server::AppState;
use template::TemplateLoader;

/// Exit status after an uncaught panic (EX_SOFTWARE).
const PANIC_EXIT_CODE: i32 = 70;

/// Serve single-page QR instruction PDFs over HTTP.
#[derive(Parser, Debug)]
#[command(name = "qr_pdf_service")]
#[command(about = "Serve single-page QR instruction PDFs over HTTP.", long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Shared secret callers must send as `authSecret`
    #[arg(long, env = "AUTH_SECRET", hide_env_values = true)]
    auth_secret: String,

    /// Background template image the QR code is stamped onto
    #[arg(short, long, env = "TEMPLATE_PATH", default_value = config::DEFAULT_TEMPLATE_PATH)]
    template: PathBuf,

    /// TrueType font for captions outside printable ASCII
    /// (defaults to a bold system sans face when one can be found)
    #[arg(long, env = "CAPTION_FONT")]
    caption_font: Option<PathBuf>,

    /// Seconds allowed for producing one document
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout_secs: u64,

    /// Log filter directive; RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn into_settings(self) -> Settings {
        Settings {
            host: self.host,
            port: self.port,
            caption_font: self.caption_font,
            logging: LoggingConfig {
                level: self.log_level,
                json: self.log_json,
            },
            ..Settings::new(self.auth_secret)
                .with_template(self.template)
                .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
        }
    }
}

/// Log uncaught panics and terminate; a supervisor is expected to restart us.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(%location, %message, "uncaught panic; exiting");
        std::process::exit(PANIC_EXIT_CODE);
    }));
}

/// Refuse to start with a template the overlay cannot be placed on.
fn check_template(loader: &TemplateLoader) -> Result<()> {
    let template = loader
        .load()
        .with_context(|| {
            format!(
                "Template asset {} failed its startup check",
                loader.path().display()
            )
        })?;
    let overlay = image::RgbaImage::new(qr::QR_SIZE, qr::QR_SIZE);
    let placement = qr_placement(template.width, qr::QR_SIZE);
    composite(&template.pixels, &overlay, placement.top, placement.left)
        .with_context(|| "Template is too small for the QR overlay")?;
    tracing::info!(
        path = %loader.path().display(),
        width = template.width,
        height = template.height,
        qr_left = placement.left,
        qr_top = QR_TOP_OFFSET,
        "template ready"
    );
    Ok(())
}

fn load_caption_fonts(path: Option<&Path>) -> Result<CaptionFonts> {
    match path {
        Some(path) => {
            let font = FallbackFont::from_file(path)?;
            tracing::info!(font = font.name(), "caption fallback font loaded");
            Ok(CaptionFonts::with_fallback(font))
        }
        None => match FallbackFont::discover() {
            Some(font) => {
                tracing::info!(font = font.name(), "caption fallback font discovered");
                Ok(CaptionFonts::with_fallback(font))
            }
            None => {
                tracing::warn!("no fallback font found; captions are limited to printable ASCII");
                Ok(CaptionFonts::standard_only())
            }
        },
    }
}

async fn run(settings: Settings) -> Result<()> {
    settings.validate()?;

    let loader = TemplateLoader::new(&settings.template_path);
    check_template(&loader)?;
    let fonts = load_caption_fonts(settings.caption_font.as_deref())?;

    let pipeline = Arc::new(Pipeline::new(Arc::new(QrEncoder::default()), loader, fonts));
    let settings = Arc::new(settings);
    let (host, port) = settings.bind_address();
    let timeout = settings.request_timeout;

    let state = web::Data::new(AppState {
        settings: settings.clone(),
        pipeline,
    });

    tracing::info!(%host, port, "listening");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(server::configure)
            .default_service(web::to(server::not_found))
    })
    .client_request_timeout(timeout)
    .bind((host.as_str(), port))
    .with_context(|| format!("Failed to bind {}:{}", host, port))?
    .run()
    .await
    .map_err(|e| anyhow!("Server error: {}", e))
}

#[actix_web::main]
async fn main() {
    let dotenv_loaded = dotenv::dotenv().is_ok();
    let args = Args::parse();
    let settings = args.into_settings();

    logging::init_logging(&settings.logging);
    install_panic_hook();
    if !dotenv_loaded {
        tracing::debug!("no .env file found, using process environment");
    }

    if let Err(e) = run(settings).await {
        eprintln!("Error: {}", e);
        for cause in e.chain().skip(1) {
            eprintln!("Caused by: {}", cause);
        }
        std::process::exit(1);
    }
}
