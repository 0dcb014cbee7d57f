use crate::archive;
use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::jail::{self, JailStatus, StatusCache};
use crate::mds;
use crate::pod::Pod;
use brig_core::{Dependency, ImageHash, ImageManifest, Name, labels_match};
use brig_dataset::{Dataset, DatasetError};
use brig_keystore::{Keystore, KeystoreError, Prefix};
use brig_remote::{FetchClient, Location, discover, key_location};
use brig_runner::Command;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const JLS: &str = "/usr/sbin/jls";

pub(crate) const IMAGES_DIR: &str = "images";
pub(crate) const PODS_DIR: &str = "pods";
const KEYS_DIR: &str = "keys";

/// The runtime's root object: configuration, the root dataset, the
/// trust store, and the process-local caches, all owned explicitly
/// rather than living in globals. Shared as `Arc<Host>` by images and
/// pods.
pub struct Host {
    pub config: HostConfig,
    pub dataset: Dataset,
    keystore: Keystore,
    fetch: FetchClient,
    status_cache: Mutex<StatusCache>,
    running_apps: Mutex<HashSet<(Uuid, Name)>>,
    mds_secret: Option<Vec<u8>>,
}

impl Host {
    /// Opens an initialized host.
    pub async fn open(config: HostConfig) -> Result<Arc<Self>> {
        match Dataset::get(&config.root_dataset).await {
            Ok(dataset) => Self::assemble(config, dataset),
            Err(DatasetError::NotFound(name)) => Err(Error::NotFound(format!(
                "host dataset {} (run `brig init` first)",
                name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates the root dataset and its `images`/`pods` children.
    pub async fn initialize(config: HostConfig) -> Result<Arc<Self>> {
        if Dataset::get(&config.root_dataset).await.is_ok() {
            return Err(Error::UsageError(format!(
                "host dataset {} already exists",
                config.root_dataset
            )));
        }

        let mountpoint = config
            .root_mountpoint
            .as_ref()
            .map(|mp| mp.display().to_string());
        let mut options: Vec<(&str, &str)> = Vec::new();
        if let Some(mp) = &mountpoint {
            options.push(("mountpoint", mp.as_str()));
        }

        tracing::info!(dataset = %config.root_dataset, "initializing host");
        let dataset = Dataset::create(&config.root_dataset, &options).await?;
        dataset.create_child(IMAGES_DIR, &[]).await?;
        dataset.create_child(PODS_DIR, &[]).await?;
        Self::assemble(config, dataset)
    }

    fn assemble(config: HostConfig, dataset: Dataset) -> Result<Arc<Self>> {
        let mds_secret = config
            .mds
            .token_key
            .as_ref()
            .map(|key| {
                hex::decode(key)
                    .map_err(|_| Error::UsageError("mds.token_key is not valid hex".to_string()))
            })
            .transpose()?;
        let ttl = Duration::from_secs(config.jail_status_ttl_secs);

        Ok(Arc::new(Host {
            keystore: Keystore::new(dataset.path(KEYS_DIR)),
            fetch: FetchClient::new()?,
            status_cache: Mutex::new(StatusCache::new(ttl)),
            running_apps: Mutex::new(HashSet::new()),
            mds_secret,
            config,
            dataset,
        }))
    }

    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.dataset.path(rel)
    }

    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    // Jail status
    //////////////////////////////////////////////////////////////////////

    /// Cached view over `jls`. The cache is advisory: pass
    /// `refresh=true` before any destructive decision.
    pub async fn jail_status(&self, name: &str, refresh: bool) -> Result<Option<JailStatus>> {
        if !refresh {
            let cache = self.status_cache.lock().unwrap();
            if cache.is_fresh() {
                return Ok(cache.get(name));
            }
        }

        let lines = Command::new(JLS)
            .args(["-d", "jid", "dying", "name"])
            .output_lines()
            .await?;
        let statuses = jail::parse_jls(&lines)?;

        let mut cache = self.status_cache.lock().unwrap();
        cache.store(statuses);
        Ok(cache.get(name))
    }

    /// Registers an app as running a foreground command; the returned
    /// guard releases the slot on drop. A second claim for the same
    /// (pod, app) fails with `AlreadyRunning`.
    pub(crate) fn claim_app(self: &Arc<Self>, pod: Uuid, app: &Name) -> Result<RunningApp> {
        let mut running = self.running_apps.lock().unwrap();
        if !running.insert((pod, app.clone())) {
            return Err(Error::AlreadyRunning(format!("app {} in pod {}", app, pod)));
        }
        Ok(RunningApp {
            host: self.clone(),
            key: (pod, app.clone()),
        })
    }

    // Network
    //////////////////////////////////////////////////////////////////////

    /// Next unused address after the host's own, probing linearly over
    /// every pod's recorded allocation.
    pub async fn next_ip(self: &Arc<Self>) -> Result<Ipv4Addr> {
        let (host_ip, prefix) = self.config.host_subnet()?;
        let mut used = HashSet::new();
        for pod in self.pods().await? {
            if let Some(ip) = pod.manifest.annotations.get(brig_core::ANNOTATION_IP)
                && let Ok(ip) = ip.parse::<Ipv4Addr>()
            {
                used.insert(ip);
            }
        }
        allocate_ip(host_ip, prefix, &used)
            .ok_or_else(|| Error::AddressExhausted(self.config.subnet.clone()))
    }

    // Metadata service support
    //////////////////////////////////////////////////////////////////////

    pub fn metadata_url(&self) -> Result<String> {
        let (host_ip, _) = self.config.host_subnet()?;
        Ok(match self.config.mds.port {
            80 => format!("http://{}", host_ip),
            port => format!("http://{}:{}", host_ip, port),
        })
    }

    /// Pod-scoped HMAC token, or None when no key is configured.
    pub fn metadata_token(&self, pod: &Uuid) -> Option<String> {
        self.mds_secret.as_ref().map(|secret| mds::token(secret, pod))
    }

    pub fn verify_metadata_token(&self, pod: &Uuid, received: &str) -> bool {
        mds::verify_token(self.mds_secret.as_deref(), pod, received)
    }

    // Images
    //////////////////////////////////////////////////////////////////////

    pub async fn images(self: &Arc<Self>) -> Result<Vec<Image>> {
        let mut images = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.path(IMAGES_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(images),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            // Hash index symlinks live next to the image directories.
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(uuid) = Uuid::parse_str(&name) else {
                tracing::warn!(entry = %name, "skipping non-UUID entry in images");
                continue;
            };
            match Image::load(self, uuid).await {
                Ok(image) => images.push(image),
                Err(e) => tracing::warn!(image = %name, error = %e, "skipping unreadable image"),
            }
        }
        Ok(images)
    }

    pub async fn image_by_uuid(self: &Arc<Self>, uuid: Uuid) -> Result<Image> {
        Image::load(self, uuid).await
    }

    pub async fn image_by_hash(self: &Arc<Self>, hash: &ImageHash) -> Result<Image> {
        let link = self.path(format!("{}/{}", IMAGES_DIR, hash));
        let target = match tokio::fs::read_link(&link).await {
            Ok(target) => target,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("image {}", hash)));
            }
            Err(e) => return Err(e.into()),
        };
        let uuid = Uuid::parse_str(&target.to_string_lossy()).map_err(|_| {
            Error::InconsistentState(format!("hash link {} points at {:?}", hash, target))
        })?;
        Image::load(self, uuid).await
    }

    /// Local resolution against all given, non-empty criteria.
    pub async fn resolve_image(
        self: &Arc<Self>,
        hash: Option<&ImageHash>,
        name: Option<&Name>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Image> {
        if hash.is_none() && name.is_none() {
            return Err(Error::UsageError(
                "image query needs a hash or a name".to_string(),
            ));
        }

        if let Some(hash) = hash {
            let image = self.image_by_hash(hash).await?;
            if let Some(name) = name
                && image.manifest.name != *name
            {
                return Err(Error::UsageError(format!(
                    "image {} is named {}, wanted {}",
                    hash.short(),
                    image.manifest.name,
                    name
                )));
            }
            if !labels_match(labels, &image.manifest.labels) {
                return Err(Error::UsageError(format!(
                    "image {} does not carry the requested labels",
                    hash.short()
                )));
            }
            return Ok(image);
        }

        let name = name.expect("name is present when hash is not");
        let mut matches: Vec<Image> = Vec::new();
        for image in self.images().await? {
            if image.manifest.name == *name && labels_match(labels, &image.manifest.labels) {
                matches.push(image);
            }
        }
        match matches.len() {
            0 => Err(Error::NotFound(format!("image {}", name))),
            1 => Ok(matches.remove(0)),
            n => Err(Error::AmbiguousMatch(format!(
                "{} local images match {}",
                n, name
            ))),
        }
    }

    /// Resolves a manifest dependency: locally first, then by remote
    /// discovery; the result is double-checked against the declaration.
    pub async fn resolve_dependency(self: &Arc<Self>, dep: &Dependency) -> Result<Image> {
        let image = match self
            .resolve_image(dep.id.as_ref(), Some(&dep.name), &dep.labels)
            .await
        {
            Ok(image) => image,
            Err(Error::NotFound(_)) => {
                // Boxed to keep the fetch → import → resolve recursion
                // finite at the type level.
                let fetched: Pin<Box<dyn Future<Output = Result<Image>> + Send + '_>> =
                    Box::pin(self.fetch_image(&dep.name, &dep.labels));
                fetched.await?
            }
            Err(e) => return Err(e),
        };

        if let Some(id) = &dep.id
            && image.hash.as_ref() != Some(id)
        {
            return Err(Error::UsageError(format!(
                "dependency pinned {}, resolved image is {}",
                id.short(),
                image
                    .hash
                    .as_ref()
                    .map(|h| h.short().to_string())
                    .unwrap_or_else(|| "unsealed".to_string())
            )));
        }
        if image.manifest.name != dep.name {
            return Err(Error::UsageError(format!(
                "dependency names {}, resolved image is {}",
                dep.name, image.manifest.name
            )));
        }
        if !labels_match(&dep.labels, &image.manifest.labels) {
            return Err(Error::UsageError(format!(
                "resolved image {} does not carry the labels required by the dependency",
                image.manifest.name
            )));
        }
        Ok(image)
    }

    /// Remote discovery, download, verification, and import of an image
    /// matching `name` + `labels`.
    pub async fn fetch_image(
        self: &Arc<Self>,
        name: &Name,
        labels: &BTreeMap<String, String>,
    ) -> Result<Image> {
        let discovered = discover(name.as_str(), labels, &self.config.images.archive_template);
        tracing::info!(image = %name, archive = %discovered.archive, "fetching image");

        let archive = self.fetch.fetch(&Location::parse(&discovered.archive)?).await?;

        let signature_location = Location::parse(&discovered.signature)?;
        let signature = if self.config.images.allow_no_signature {
            let found = self.fetch.fetch_optional(&signature_location).await?;
            if found.is_none() {
                tracing::warn!(image = %name, "no signature published, proceeding as configured");
            }
            found
        } else {
            Some(self.fetch.fetch(&signature_location).await?)
        };
        let signature = signature
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|_| {
                    Error::UsageError(format!(
                        "signature at {} is not valid text",
                        discovered.signature
                    ))
                })
            })
            .transpose()?;

        self.import_image(&discovered.archive, Some(name), archive, signature.as_deref())
            .await
    }

    /// Imports an archive: verifies its signature (with one automatic
    /// key-discovery retry on an unknown issuer), allocates an open
    /// image, unpacks the rootfs while deriving the content hash over
    /// the canonical decompressed stream, and seals. A failure after
    /// allocation destroys the partial image best-effort.
    pub async fn import_image(
        self: &Arc<Self>,
        origin: &str,
        expected_name: Option<&Name>,
        archive: Vec<u8>,
        signature: Option<&str>,
    ) -> Result<Image> {
        let canonical = archive::decompress(&archive)?;
        let manifest = archive::read_manifest(&canonical)?;

        if let Some(expected) = expected_name
            && manifest.name != *expected
        {
            return Err(Error::UsageError(format!(
                "archive name mismatch: fetched {}, manifest says {}",
                expected, manifest.name
            )));
        }

        match signature {
            Some(signature) => {
                self.verify_import_signature(&manifest.name, &archive, signature)
                    .await?
            }
            None if !self.config.images.allow_no_signature => {
                return Err(Error::UsageError(
                    "no signature given and unsigned images are not allowed".to_string(),
                ));
            }
            None => tracing::warn!(image = %manifest.name, "importing without a signature"),
        }

        let uuid = Uuid::new_v4();
        tracing::info!(image = %manifest.name, %uuid, "importing");
        tokio::fs::create_dir_all(self.path(format!("{}/{}", IMAGES_DIR, uuid))).await?;

        match self
            .import_into(uuid, manifest, &canonical, origin, signature)
            .await
        {
            Ok(image) => Ok(image),
            Err(e) => {
                if let Err(cleanup) = self.destroy_image_record(uuid, None).await {
                    tracing::warn!(%uuid, error = %cleanup, "cleanup of partial image failed");
                }
                Err(e)
            }
        }
    }

    async fn verify_import_signature(
        self: &Arc<Self>,
        name: &Name,
        archive: &[u8],
        signature: &str,
    ) -> Result<()> {
        match self.keystore.check_signature(name, archive, signature) {
            Ok(key) => {
                tracing::info!(image = %name, fingerprint = %key.fingerprint, "signature verified");
                Ok(())
            }
            Err(KeystoreError::UnknownIssuer { issuer, .. }) => {
                tracing::info!(
                    image = %name,
                    %issuer,
                    "signed by an unknown issuer, attempting key discovery"
                );
                self.trust_key(&Prefix::Name(name.clone()), None, None).await?;
                let key = self.keystore.check_signature(name, archive, signature)?;
                tracing::info!(image = %name, fingerprint = %key.fingerprint, "signature verified after key discovery");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn import_into<'a>(
        self: &'a Arc<Self>,
        uuid: Uuid,
        manifest: ImageManifest,
        canonical: &'a [u8],
        origin: &'a str,
        signature: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Image>> + Send + 'a>> {
        Box::pin(async move {
        let mut manifest = manifest;
        let rel = format!("{}/{}", IMAGES_DIR, uuid);
        let image_dir = self.path(&rel);
        let rootfs_mount = image_dir.join(archive::ROOTFS_ENTRY);

        if manifest.dependencies.len() > 1 {
            return Err(Error::Unsupported(format!(
                "image declares {} dependencies; only a single parent layer is supported",
                manifest.dependencies.len()
            )));
        }

        if let Some(dep) = manifest.dependencies.first().cloned() {
            let parent = self.resolve_dependency(&dep).await?;
            tracing::info!(parent = %parent.manifest.name, "cloning parent as base rootfs");
            manifest.dependencies[0].id = parent.hash.clone();
            parent
                .clone_rootfs(&self.dataset.child_name(&rel), &rootfs_mount)
                .await?;
        } else {
            let mountpoint = rootfs_mount.display().to_string();
            self.dataset
                .create_child(&rel, &[("mountpoint", mountpoint.as_str())])
                .await?;
        }

        if let Some(signature) = signature {
            tokio::fs::write(image_dir.join("signature"), signature).await?;
        }

        tracing::debug!(%uuid, "unpacking rootfs");
        archive::unpack_rootfs(canonical, &image_dir)?;
        let hash = archive::content_hash(canonical);

        let image = Image {
            host: self.clone(),
            uuid,
            manifest,
            hash: Some(hash),
            timestamp: Utc::now(),
            origin: Some(origin.to_string()),
        };
        image.save_manifest().await?;
        if self.config.images.store_archives {
            archive::write_archive_file(
                canonical,
                &image_dir.join("archive"),
                self.config.images.compression,
            )?;
        }
        image.seal().await?;
        tracing::info!(image = %image.manifest.name, hash = %image.hash.as_ref().unwrap().short(), "imported");
        Ok(image)
        })
    }

    /// Destroys an image unless a pod or another image still depends on
    /// it. The check and the destroy are not atomic across concurrent
    /// invocations; dataset-level atomicity is the only guarantee there.
    pub async fn destroy_image(self: &Arc<Self>, image: &Image) -> Result<()> {
        if let Some(hash) = &image.hash {
            for pod in self.pods().await? {
                if pod
                    .manifest
                    .apps
                    .iter()
                    .any(|app| app.image.id.as_ref() == Some(hash))
                {
                    return Err(Error::InUse(format!(
                        "image {} is used by pod {}",
                        hash.short(),
                        pod.uuid
                    )));
                }
            }
            for other in self.images().await? {
                if other.uuid != image.uuid
                    && other
                        .manifest
                        .dependencies
                        .iter()
                        .any(|dep| dep.id.as_ref() == Some(hash))
                {
                    return Err(Error::InUse(format!(
                        "image {} is a parent of {}",
                        hash.short(),
                        other.manifest.name
                    )));
                }
            }
        }
        self.destroy_image_record(image.uuid, image.hash.as_ref())
            .await
    }

    /// Best-effort removal of an image's dataset, hash link, and
    /// directory record; the first error is reported after all steps
    /// ran.
    pub(crate) async fn destroy_image_record(
        &self,
        uuid: Uuid,
        hash: Option<&ImageHash>,
    ) -> Result<()> {
        let mut first_error: Option<Error> = None;

        match self.dataset.get_child(&format!("{}/{}", IMAGES_DIR, uuid)).await {
            Ok(ds) => {
                if let Err(e) = ds.destroy().await {
                    first_error.get_or_insert(e.into());
                }
            }
            Err(DatasetError::NotFound(_)) => {}
            Err(e) => {
                first_error.get_or_insert(e.into());
            }
        }

        if let Some(hash) = hash
            && let Err(e) = tokio::fs::remove_file(self.path(format!("{}/{}", IMAGES_DIR, hash))).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            first_error.get_or_insert(e.into());
        }

        if let Err(e) = tokio::fs::remove_dir_all(self.path(format!("{}/{}", IMAGES_DIR, uuid))).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            first_error.get_or_insert(e.into());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // Trust
    //////////////////////////////////////////////////////////////////////

    /// Fetches and stores a trusted key. With no explicit location the
    /// key is discovered at the prefix's published location; the root
    /// prefix has no such location and must be given one.
    pub async fn trust_key(
        &self,
        prefix: &Prefix,
        location: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Result<PathBuf> {
        let location = match location {
            Some(location) => location.to_string(),
            None => match prefix {
                Prefix::Root => {
                    return Err(Error::UsageError(
                        "cannot discover a root key; give an explicit location".to_string(),
                    ));
                }
                Prefix::Name(name) => {
                    key_location(name.as_str(), &self.config.images.key_template)
                }
            },
        };

        let bytes = self.fetch.fetch(&Location::parse(&location)?).await?;
        let armored = String::from_utf8(bytes)
            .map_err(|_| Error::UsageError(format!("key at {} is not valid text", location)))?;
        let path = self.keystore.store_trusted_key(prefix, &armored, fingerprint)?;
        Ok(path)
    }

    // Pods
    //////////////////////////////////////////////////////////////////////

    pub async fn pods(self: &Arc<Self>) -> Result<Vec<Pod>> {
        let mut pods = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.path(PODS_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(pods),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(uuid) = Uuid::parse_str(&name) else {
                tracing::warn!(entry = %name, "skipping non-UUID entry in pods");
                continue;
            };
            match Pod::load(self, uuid).await {
                Ok(pod) => pods.push(pod),
                Err(e) => tracing::warn!(pod = %name, error = %e, "skipping unreadable pod"),
            }
        }
        Ok(pods)
    }

    pub async fn pod(self: &Arc<Self>, uuid: Uuid) -> Result<Pod> {
        Pod::load(self, uuid).await
    }

    /// Lookup by allocated address, the metadata service's view of a
    /// request's source.
    pub async fn pod_by_ip(self: &Arc<Self>, ip: Ipv4Addr) -> Result<Pod> {
        let wanted = ip.to_string();
        for pod in self.pods().await? {
            if pod.manifest.annotations.get(brig_core::ANNOTATION_IP) == Some(&wanted) {
                return Ok(pod);
            }
        }
        Err(Error::NotFound(format!("pod with address {}", ip)))
    }

    pub async fn create_pod(
        self: &Arc<Self>,
        manifest: brig_core::PodManifest,
    ) -> Result<Pod> {
        Pod::create(self, manifest).await
    }

    /// Resolves every app's image reference to a hash and fills in
    /// omitted mounts and volumes before a pod manifest is sealed.
    pub async fn reify_pod_manifest(
        self: &Arc<Self>,
        manifest: &mut brig_core::PodManifest,
    ) -> Result<()> {
        crate::pod::reify(self, manifest).await
    }
}

/// Guard over the one-foreground-command-per-app rule.
pub(crate) struct RunningApp {
    host: Arc<Host>,
    key: (Uuid, Name),
}

impl Drop for RunningApp {
    fn drop(&mut self) {
        self.host.running_apps.lock().unwrap().remove(&self.key);
    }
}

/// First free address after `host`, staying inside the subnet and off
/// the broadcast address.
pub(crate) fn allocate_ip(
    host: Ipv4Addr,
    prefix: u8,
    used: &HashSet<Ipv4Addr>,
) -> Option<Ipv4Addr> {
    let mask = u32::MAX << (32 - prefix);
    let host = u32::from(host);
    let network = host & mask;
    let broadcast = network | !mask;

    let mut candidate = host.saturating_add(1);
    while candidate < broadcast {
        let ip = Ipv4Addr::from(candidate);
        if !used.contains(&ip) {
            return Some(ip);
        }
        candidate += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_first_free() {
        let host: Ipv4Addr = "172.23.0.1".parse().unwrap();
        let mut used = HashSet::new();
        assert_eq!(
            allocate_ip(host, 24, &used),
            Some("172.23.0.2".parse().unwrap())
        );

        used.insert("172.23.0.2".parse().unwrap());
        used.insert("172.23.0.3".parse().unwrap());
        assert_eq!(
            allocate_ip(host, 24, &used),
            Some("172.23.0.4".parse().unwrap())
        );

        // Holes left by destroyed pods are reused.
        used.remove(&"172.23.0.2".parse().unwrap());
        assert_eq!(
            allocate_ip(host, 24, &used),
            Some("172.23.0.2".parse().unwrap())
        );
    }

    #[test]
    fn test_allocate_exhaustion() {
        let host: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let mut used = HashSet::new();
        // /30 leaves exactly one address after the host.
        assert_eq!(
            allocate_ip(host, 30, &used),
            Some("10.0.0.2".parse().unwrap())
        );
        used.insert("10.0.0.2".parse().unwrap());
        assert_eq!(allocate_ip(host, 30, &used), None);
    }

    #[test]
    fn test_allocate_never_hands_out_broadcast() {
        let host: Ipv4Addr = "10.0.1.1".parse().unwrap();
        let used: HashSet<Ipv4Addr> = (2..255)
            .map(|n| Ipv4Addr::new(10, 0, 1, n))
            .collect();
        assert_eq!(allocate_ip(host, 24, &used), None);
    }
}
