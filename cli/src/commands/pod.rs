use brig_core::{ANNOTATION_IP, Name, PodManifest};
use brig_runtime::{Error, Host, Pod, Result};
use clap::Subcommand;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum PodCommands {
    /// List pods with their status
    List,
    /// Create a pod from a manifest file
    Create {
        /// Pod manifest (JSON)
        manifest: PathBuf,
    },
    /// Run an app's declared lifecycle (hooks and main exec)
    Run {
        pod: Uuid,

        /// App name; defaults to the pod's only app
        #[arg(long)]
        app: Option<String>,
    },
    /// Run one command inside an app
    Exec {
        pod: Uuid,

        /// App name; defaults to the pod's only app
        #[arg(long)]
        app: Option<String>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        group: Option<String>,

        #[arg(long)]
        cwd: Option<String>,

        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Interactive login shell inside an app
    Console {
        pod: Uuid,

        #[arg(long)]
        app: Option<String>,

        #[arg(long, default_value = "root")]
        user: String,
    },
    /// Show a pod's derived status
    Status { pod: Uuid },
    /// Stop a pod's jail (no-op when already stopped)
    Kill { pod: Uuid },
    /// Kill a pod and remove its on-disk state
    Destroy { pod: Uuid },
}

fn pick_app(pod: &Pod, app: Option<String>) -> Result<Name> {
    match app {
        Some(app) => Ok(Name::parse(&app)?),
        None => {
            if pod.manifest.apps.len() > 1 {
                return Err(Error::AmbiguousMatch(format!(
                    "pod {} has {} apps; pick one with --app",
                    pod.uuid,
                    pod.manifest.apps.len()
                )));
            }
            Ok(pod.manifest.apps[0].name.clone())
        }
    }
}

pub async fn pod(host: &Arc<Host>, cmd: PodCommands) -> Result<()> {
    match cmd {
        PodCommands::List => {
            println!("{:<38} {:<8} {:<16} APPS", "UUID", "STATUS", "ADDRESS");
            for pod in host.pods().await? {
                let status = pod.status().await?;
                let address = pod
                    .manifest
                    .annotations
                    .get(ANNOTATION_IP)
                    .cloned()
                    .unwrap_or_default();
                let apps: Vec<&str> = pod
                    .manifest
                    .apps
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect();
                println!(
                    "{:<38} {:<8} {:<16} {}",
                    pod.uuid,
                    status,
                    address,
                    apps.join(", ")
                );
            }
            Ok(())
        }

        PodCommands::Create { manifest } => {
            let bytes = tokio::fs::read(&manifest).await?;
            let mut manifest: PodManifest = serde_json::from_slice(&bytes)?;
            host.reify_pod_manifest(&mut manifest).await?;
            let pod = host.create_pod(manifest).await?;
            println!("{}", pod.uuid);
            Ok(())
        }

        PodCommands::Run { pod, app } => {
            let pod = host.pod(pod).await?;
            let app = pick_app(&pod, app)?;
            pod.run_app(&app).await
        }

        PodCommands::Exec {
            pod,
            app,
            user,
            group,
            cwd,
            command,
        } => {
            let pod = host.pod(pod).await?;
            let app = pick_app(&pod, app)?;
            let handle = pod.app(&app).await?;
            handle
                .exec(user.as_deref(), group.as_deref(), cwd.as_deref(), &command)
                .await
        }

        PodCommands::Console { pod, app, user } => {
            let pod = host.pod(pod).await?;
            let app = pick_app(&pod, app)?;
            pod.console(&app, &user).await
        }

        PodCommands::Status { pod } => {
            let pod = host.pod(pod).await?;
            println!("{}", pod.status().await?);
            Ok(())
        }

        PodCommands::Kill { pod } => {
            let pod = host.pod(pod).await?;
            pod.kill().await
        }

        PodCommands::Destroy { pod } => {
            let pod = host.pod(pod).await?;
            pod.destroy().await
        }
    }
}
