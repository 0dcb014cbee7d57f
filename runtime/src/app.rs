use crate::error::{Error, Result};
use crate::passwd::{GroupFile, PasswdFile};
use crate::pod::Pod;
use brig_core::{App, HandlerKind, Name};
use brig_runner::Command;
use std::path::PathBuf;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const DEFAULT_TERM: &str = "vt100";

/// Handle on one app instance of a pod, with its effective descriptor
/// (runtime override, else the image's, else a console shell).
pub struct AppHandle<'p> {
    pod: &'p Pod,
    pub name: Name,
    index: usize,
    descriptor: App,
}

impl Pod {
    pub async fn app(&self, name: &Name) -> Result<AppHandle<'_>> {
        let (index, rtapp) = self
            .manifest
            .apps
            .iter()
            .enumerate()
            .find(|(_, a)| &a.name == name)
            .ok_or_else(|| Error::NotFound(format!("app {} in pod {}", name, self.uuid)))?;

        let descriptor = match &rtapp.app {
            Some(app) => app.clone(),
            None => {
                let Some(id) = &rtapp.image.id else {
                    return Err(Error::UsageError(format!(
                        "app {} has no image hash",
                        rtapp.name
                    )));
                };
                let image = self.host.image_by_hash(id).await?;
                image
                    .manifest
                    .app
                    .clone()
                    .unwrap_or_else(|| console_app("root"))
            }
        };

        Ok(AppHandle {
            pod: self,
            name: name.clone(),
            index,
            descriptor,
        })
    }

    /// Runs an app's declared lifecycle (hooks and main exec).
    pub async fn run_app(&self, name: &Name) -> Result<()> {
        self.app(name).await?.run().await
    }

    /// Interactive login shell inside an app.
    pub async fn console(&self, name: &Name, user: &str) -> Result<()> {
        let user = if user.is_empty() { "root" } else { user };
        let handle = self.app(name).await?;
        let console = console_app(user);
        handle.stage2("0", "0", "", &console.exec).await
    }
}

fn console_app(user: &str) -> App {
    let mut app = App::new(vec![
        "/usr/bin/login".to_string(),
        "-fp".to_string(),
        user.to_string(),
    ]);
    app.user = "0".to_string();
    app.group = "0".to_string();
    app
}

/// Declared environment plus defaulted PATH and TERM.
fn app_environment(descriptor: &App) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = descriptor
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !env.iter().any(|(k, _)| k == "PATH") {
        env.push(("PATH".to_string(), DEFAULT_PATH.to_string()));
    }
    if !env.iter().any(|(k, _)| k == "TERM") {
        let term = std::env::var("TERM").unwrap_or_else(|_| DEFAULT_TERM.to_string());
        env.push(("TERM".to_string(), term));
    }
    env
}

impl AppHandle<'_> {
    pub fn rootfs(&self) -> PathBuf {
        self.pod.path_join(format!("rootfs/{}", self.index))
    }

    fn chroot(&self) -> String {
        format!("/{}", self.index)
    }

    /// The app's declared lifecycle: `pre-start` hook (failure aborts),
    /// main exec, then `post-stop`, which is attempted even when the
    /// main exec failed but never masks its error.
    pub async fn run(&self) -> Result<()> {
        if let Some(handler) = self.descriptor.handler(HandlerKind::PreStart) {
            tracing::debug!(app = %self.name, "running pre-start hook");
            self.stage2("0", "0", &self.descriptor.working_directory, &handler.exec)
                .await?;
        }

        let main = self
            .stage2(
                &self.descriptor.user,
                &self.descriptor.group,
                &self.descriptor.working_directory,
                &self.descriptor.exec,
            )
            .await;

        let post = match self.descriptor.handler(HandlerKind::PostStop) {
            Some(handler) => {
                tracing::debug!(app = %self.name, "running post-stop hook");
                self.stage2("0", "0", &self.descriptor.working_directory, &handler.exec)
                    .await
            }
            None => Ok(()),
        };

        match (main, post) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(post_err)) => Err(post_err),
            (Err(main_err), Ok(())) => Err(main_err),
            (Err(main_err), Err(post_err)) => {
                tracing::warn!(app = %self.name, error = %post_err, "post-stop hook also failed");
                Err(main_err)
            }
        }
    }

    /// One foreground command inside the app; explicit arguments
    /// override the manifest defaults.
    pub async fn exec(
        &self,
        user: Option<&str>,
        group: Option<&str>,
        cwd: Option<&str>,
        command: &[String],
    ) -> Result<()> {
        self.stage2(
            user.unwrap_or(&self.descriptor.user),
            group.unwrap_or(&self.descriptor.group),
            cwd.unwrap_or(&self.descriptor.working_directory),
            command,
        )
        .await
    }

    async fn stage2(&self, user: &str, group: &str, cwd: &str, command: &[String]) -> Result<()> {
        if command.is_empty() {
            return Err(Error::UsageError(format!(
                "app {} has no command to run",
                self.name
            )));
        }

        // One foreground command per app per process.
        let _guard = self.pod.host.claim_app(self.pod.uuid, &self.name)?;

        let jid = self.pod.start().await?;

        let user = if user.is_empty() { "0" } else { user };
        let cwd = if cwd.is_empty() { "/" } else { cwd };

        let passwd = PasswdFile::load(&self.rootfs().join("etc/passwd"))?;
        let entry = passwd.find(user).ok_or_else(|| {
            Error::NotFound(format!("user {} in app {}", user, self.name))
        })?;
        let uid = entry.uid;
        let gid = if group.is_empty() {
            entry.gid
        } else {
            GroupFile::load(&self.rootfs().join("etc/group"))?
                .find_gid(group)
                .ok_or_else(|| {
                    Error::NotFound(format!("group {} in app {}", group, self.name))
                })?
        };

        let mds = self.pod.host.metadata_url()?;

        let mut cmd = Command::new(self.pod.host.config.attach_helper.display().to_string())
            .arg("-jid")
            .arg(jid.to_string())
            .arg("-chroot")
            .arg(self.chroot())
            .arg("-name")
            .arg(self.name.as_str())
            .arg("-mds")
            .arg(mds)
            .arg("-user")
            .arg(uid.to_string())
            .arg("-group")
            .arg(gid.to_string())
            .arg("-cwd")
            .arg(cwd);
        for (key, value) in app_environment(&self.descriptor) {
            cmd = cmd.arg("-setenv").arg(format!("{}={}", key, value));
        }
        if let Some(token) = self.pod.host.metadata_token(&self.pod.uuid) {
            cmd = cmd.arg("-setenv").arg(format!("MDS_TOKEN={}", token));
        }
        cmd = cmd.args(command.iter().cloned());

        tracing::debug!(app = %self.name, %uid, %gid, "entering jail");
        cmd.run().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults() {
        let app = App::new(vec!["/bin/true".to_string()]);
        let env = app_environment(&app);
        assert!(env.iter().any(|(k, v)| k == "PATH" && v == DEFAULT_PATH));
        assert!(env.iter().any(|(k, _)| k == "TERM"));
    }

    #[test]
    fn test_environment_respects_declared() {
        let mut app = App::new(vec!["/bin/true".to_string()]);
        app.environment
            .insert("PATH".to_string(), "/only/this".to_string());
        app.environment
            .insert("WORKERS".to_string(), "4".to_string());

        let env = app_environment(&app);
        let paths: Vec<&(String, String)> =
            env.iter().filter(|(k, _)| k == "PATH").collect();
        assert_eq!(paths, vec![&("PATH".to_string(), "/only/this".to_string())]);
        assert!(env.iter().any(|(k, v)| k == "WORKERS" && v == "4"));
    }

    #[test]
    fn test_console_app() {
        let app = console_app("operator");
        assert_eq!(app.exec, vec!["/usr/bin/login", "-fp", "operator"]);
        assert_eq!(app.user, "0");
    }
}
