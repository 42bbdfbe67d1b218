use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

mod configuration;
mod device;
mod error;
mod log;
mod serde_ext;
mod server;
mod session;
mod settings;
mod store;

use configuration::Conf;
use device::soundtouch::SoundTouchConnector;
use server::AppState;
use session::DeviceSession;
use settings::SettingsFile;
use store::StateStore;

#[tokio::main]
async fn main() -> Result<()> {
    log::init_tracing();
    debug!("Tracing initialized");

    let conf = Conf::load();
    debug!("Configuration: {:?}", conf);

    let settings = SettingsFile::new(&conf.settings_file);
    info!("Using settings file '{}'.", settings.path().display());
    let store = StateStore::new(settings.load_or_else(prompt_identity)?, settings);

    let connector = SoundTouchConnector::new(&conf.device)
        .context("Could not build the device HTTP client")?;
    let session = DeviceSession::new(store, Arc::new(connector), conf.session.clone());
    let supervisor = session.spawn();

    let served = server::serve(&conf.http, AppState { session }).await;

    supervisor.abort();
    info!("Stopped.");
    served
}

/// Asks for the device address and name on the terminal.
fn prompt_identity() -> Result<(String, String)> {
    let address = prompt("Enter IP of device: ")?;
    let name = prompt("Enter Name of device: ")?;
    Ok((address, name))
}

fn prompt(question: &str) -> Result<String> {
    let mut stdout = io::stdout();
    stdout.write_all(question.as_bytes())?;
    stdout.flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Could not read from stdin")?;

    let answer = answer.trim();
    anyhow::ensure!(!answer.is_empty(), "No answer given to '{}'", question.trim());
    Ok(answer.to_string())
}
