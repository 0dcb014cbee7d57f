use super::parse_labels;
use brig_core::{ImageHash, Name};
use brig_runtime::{Error, Host, Image, Result};
use clap::Subcommand;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum ImageCommands {
    /// List images
    List,
    /// Import an archive (with optional detached signature) from disk
    Import {
        archive: PathBuf,

        /// Detached signature file; defaults to `<archive>.sig` when
        /// present
        #[arg(long)]
        signature: Option<PathBuf>,

        /// Name the archive is expected to carry
        #[arg(long)]
        name: Option<String>,
    },
    /// Discover, download, verify, and import an image
    Fetch {
        name: String,

        /// Label constraint, repeatable (key=value)
        #[arg(long = "label")]
        labels: Vec<String>,
    },
    /// Build a child image by running a command in a disposable pod
    Build {
        /// Parent image (hash, UUID, or name)
        parent: String,

        /// Directory copied into the build work dir
        #[arg(long)]
        dir: PathBuf,

        /// Extra files copied alongside, repeatable
        #[arg(long = "add")]
        add_files: Vec<PathBuf>,

        /// Build command
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Export an image as a flat archive
    Export {
        /// Image (hash, UUID, or name)
        image: String,
        output: PathBuf,
    },
    /// Destroy an image that nothing depends on
    Destroy {
        /// Image (hash, UUID, or name)
        image: String,
    },
}

/// Accepts a hash, a UUID, or a name as an image reference.
pub(crate) async fn resolve_ref(host: &Arc<Host>, reference: &str) -> Result<Image> {
    if let Ok(hash) = reference.parse::<ImageHash>() {
        return host.image_by_hash(&hash).await;
    }
    if let Ok(uuid) = Uuid::parse_str(reference) {
        return host.image_by_uuid(uuid).await;
    }
    let name = Name::parse(reference)?;
    host.resolve_image(None, Some(&name), &Default::default())
        .await
}

pub async fn image(host: &Arc<Host>, cmd: ImageCommands) -> Result<()> {
    match cmd {
        ImageCommands::List => {
            let mut images = host.images().await?;
            images.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
            println!("{:<40} {:<24} {}", "NAME", "HASH", "IMPORTED");
            for image in images {
                let hash = image
                    .hash
                    .as_ref()
                    .map(|h| h.short().to_string())
                    .unwrap_or_else(|| "(open)".to_string());
                println!(
                    "{:<40} {:<24} {}",
                    image.manifest.name,
                    hash,
                    image.timestamp.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }

        ImageCommands::Import {
            archive,
            signature,
            name,
        } => {
            let bytes = tokio::fs::read(&archive).await?;

            let signature_path = signature.or_else(|| {
                let mut conventional = archive.as_os_str().to_os_string();
                conventional.push(".sig");
                let conventional = PathBuf::from(conventional);
                conventional.exists().then_some(conventional)
            });
            let signature_text = match &signature_path {
                Some(path) => Some(tokio::fs::read_to_string(path).await?),
                None => None,
            };

            let expected_name = name.as_deref().map(Name::parse).transpose()?;
            let image = host
                .import_image(
                    &archive.display().to_string(),
                    expected_name.as_ref(),
                    bytes,
                    signature_text.as_deref(),
                )
                .await?;
            println!("{}", image);
            Ok(())
        }

        ImageCommands::Fetch { name, labels } => {
            let name = Name::parse(&name)?;
            let labels = parse_labels(&labels)?;
            let image = host.fetch_image(&name, &labels).await?;
            println!("{}", image);
            Ok(())
        }

        ImageCommands::Build {
            parent,
            dir,
            add_files,
            command,
        } => {
            let parent = resolve_ref(host, &parent).await?;
            let child = parent.build(&dir, &add_files, command).await?;
            println!("{}", child);
            Ok(())
        }

        ImageCommands::Export { image, output } => {
            let image = resolve_ref(host, &image).await?;
            if !image.is_sealed() {
                return Err(Error::UsageError(format!(
                    "image {} is not sealed yet",
                    image.uuid
                )));
            }
            let hash = image.export(&output).await?;
            println!("{}", hash);
            Ok(())
        }

        ImageCommands::Destroy { image } => {
            let image = resolve_ref(host, &image).await?;
            host.destroy_image(&image).await?;
            println!("destroyed {}", image);
            Ok(())
        }
    }
}
