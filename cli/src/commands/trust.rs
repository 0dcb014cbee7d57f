use brig_keystore::Prefix;
use brig_runtime::{Host, Result};
use clap::Subcommand;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum TrustCommands {
    /// List trusted keys
    List,
    /// Fetch and store a trusted key for a name prefix
    Add {
        /// Name prefix the key is trusted for; omit for the root
        /// anchor (requires --location)
        #[arg(default_value = "")]
        prefix: String,

        /// Key location (path or URL); discovered from the prefix when
        /// omitted
        #[arg(long)]
        location: Option<String>,

        /// Require the key to have this fingerprint
        #[arg(long)]
        fingerprint: Option<String>,
    },
    /// Remove a key from every prefix that carries it
    Remove { fingerprint: String },
}

pub async fn trust(host: &Arc<Host>, cmd: TrustCommands) -> Result<()> {
    match cmd {
        TrustCommands::List => {
            println!("{:<28} FINGERPRINT", "PREFIX");
            for key in host.keystore().get_all_keys()?.iter() {
                println!("{:<28} {}", key.prefix, key.fingerprint);
            }
            Ok(())
        }

        TrustCommands::Add {
            prefix,
            location,
            fingerprint,
        } => {
            let prefix = Prefix::parse(&prefix).map_err(brig_runtime::Error::from)?;
            let path = host
                .trust_key(&prefix, location.as_deref(), fingerprint.as_deref())
                .await?;
            println!("key accepted and saved as {}", path.display());
            Ok(())
        }

        TrustCommands::Remove { fingerprint } => {
            let removed = host.keystore().untrust_key(&fingerprint)?;
            if removed.is_empty() {
                println!("no keys with fingerprint {}", fingerprint);
            } else {
                for prefix in removed {
                    println!("removed from {}", prefix);
                }
            }
            Ok(())
        }
    }
}
