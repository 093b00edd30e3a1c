use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

/// D-Bus client of the miend daemon.
#[zbus::proxy(
    interface = "org.mien.Mien1",
    default_service = "org.mien.Mien1",
    default_path = "/org/mien/Mien1"
)]
trait Mien {
    async fn save_face(
        &self,
        name: &str,
        email: &str,
        phone: &str,
        image: &[u8],
    ) -> zbus::Result<String>;

    async fn save_group(&self, names: &str, image: &[u8]) -> zbus::Result<String>;

    async fn recognize(&self, image: &[u8]) -> zbus::Result<String>;

    async fn recognize_group(&self, image: &[u8]) -> zbus::Result<String>;

    async fn detect(&self, image: &[u8]) -> zbus::Result<String>;

    async fn list_faces(&self) -> zbus::Result<String>;

    async fn delete_face(&self, id: i64, name: &str) -> zbus::Result<String>;

    async fn update_contact(
        &self,
        id: i64,
        name: &str,
        email: &str,
        phone: &str,
    ) -> zbus::Result<String>;

    async fn recent_logs(&self, limit: u32) -> zbus::Result<String>;

    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "mien", about = "mien face registry CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save the most confident face in an image
    Save {
        /// Display name for the person
        #[arg(short, long)]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
        /// Image file to upload
        image: PathBuf,
    },
    /// Save every face in a group photo, names left to right
    SaveGroup {
        /// Comma-separated names, e.g. "Ada,Grace,Edsger"
        #[arg(short, long)]
        names: String,
        image: PathBuf,
    },
    /// Recognize face(s) in an image
    Recognize {
        image: PathBuf,
        /// Recognize every face instead of just the most confident one
        #[arg(long)]
        group: bool,
    },
    /// Preview detections without saving
    Detect { image: PathBuf },
    /// List saved faces
    List,
    /// Delete face record(s) by id or name
    Delete {
        #[arg(long, conflicts_with = "name")]
        id: Option<i64>,
        /// Removes every record with this name
        #[arg(long)]
        name: Option<String>,
    },
    /// Edit a record's contact details
    Update {
        id: i64,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
    },
    /// Show recent recognition attempts
    Log {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = MienProxy::new(&connection)
        .await
        .context("connecting to miend (is the daemon running?)")?;

    let response = match cli.command {
        Commands::Save {
            name,
            email,
            phone,
            image,
        } => {
            let bytes = read_image(&image)?;
            proxy.save_face(&name, &email, &phone, &bytes).await?
        }
        Commands::SaveGroup { names, image } => {
            let bytes = read_image(&image)?;
            proxy.save_group(&names, &bytes).await?
        }
        Commands::Recognize { image, group } => {
            let bytes = read_image(&image)?;
            if group {
                proxy.recognize_group(&bytes).await?
            } else {
                proxy.recognize(&bytes).await?
            }
        }
        Commands::Detect { image } => {
            let bytes = read_image(&image)?;
            proxy.detect(&bytes).await?
        }
        Commands::List => proxy.list_faces().await?,
        Commands::Delete { id, name } => match (id, name) {
            (Some(id), _) => proxy.delete_face(id, "").await?,
            (None, Some(name)) => proxy.delete_face(0, &name).await?,
            (None, None) => bail!("either --id or --name must be provided"),
        },
        Commands::Update {
            id,
            name,
            email,
            phone,
        } => proxy.update_contact(id, &name, &email, &phone).await?,
        Commands::Log { limit } => proxy.recent_logs(limit).await?,
        Commands::Status => proxy.status().await?,
    };

    print_json(&response);
    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

/// Pretty-print a JSON response; fall back to raw text if it isn't JSON.
fn print_json(response: &str) {
    match serde_json::from_str::<serde_json::Value>(response) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{response}"),
        },
        Err(_) => println!("{response}"),
    }
}
