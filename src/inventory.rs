//! Instance inventory: which modules are applied to the cluster.
//!
//! Each applied instance is recorded in a secret labelled
//! `app.kubernetes.io/managed-by=modpull` whose `instance` data key holds
//! the instance as JSON. [`KubectlInventory`] reads those secrets through
//! `kubectl`; [`render_table`] formats the result for the `list` command.

use crate::command::{CommandError, CommandExecutor, failure_summary};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Label selecting the secrets that record instances.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by=modpull";

/// Label naming the bundle an instance belongs to.
pub const BUNDLE_LABEL: &str = "bundle.modpull.io/name";

/// Secret data key holding the encoded instance.
const INSTANCE_KEY: &str = "instance";

/// Which namespaces a listing covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceScope {
    /// Every namespace in the cluster.
    All,
    /// A single namespace.
    Named(String),
}

impl From<&str> for NamespaceScope {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Self::All
        } else {
            Self::Named(trimmed.to_owned())
        }
    }
}

/// The module an instance was built from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleInfo {
    /// Module repository URL.
    pub repository: String,
    /// Module version.
    pub version: String,
    /// Manifest digest of the applied version.
    pub digest: String,
}

/// An applied module instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Instance {
    /// Instance name.
    pub name: String,
    /// Namespace the instance lives in.
    pub namespace: String,
    /// The module the instance was built from.
    pub module: ModuleInfo,
    /// When the instance was last applied.
    pub last_transition_time: String,
    /// Instance labels.
    pub labels: BTreeMap<String, String>,
}

impl Instance {
    /// Return the bundle the instance belongs to, if any.
    #[must_use]
    pub fn bundle(&self) -> Option<&str> {
        self.labels
            .get(BUNDLE_LABEL)
            .map(String::as_str)
            .filter(|b| !b.is_empty())
    }
}

/// Errors raised while listing instances.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// `kubectl` could not be run.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// `kubectl` ran and reported a failure.
    #[error("kubectl failed: {reason}")]
    Query {
        /// `kubectl`'s diagnostic output.
        reason: String,
    },

    /// The secret list or an instance payload could not be decoded.
    #[error("failed to decode {what}: {reason}")]
    Decode {
        /// What was being decoded.
        what: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Source of applied instances.
pub trait InstanceStore {
    /// List instances in `scope`, optionally restricted to one bundle.
    ///
    /// # Errors
    ///
    /// Returns an [`InventoryError`] if the store cannot be queried.
    fn list(
        &self,
        scope: &NamespaceScope,
        bundle: Option<&str>,
    ) -> Result<Vec<Instance>, InventoryError>;
}

/// Instance store backed by `kubectl get secrets`.
pub struct KubectlInventory<'a> {
    executor: &'a dyn CommandExecutor,
    binary: String,
    timeout: Duration,
}

impl<'a> KubectlInventory<'a> {
    /// Query the cluster with `binary` through `executor`, giving up after
    /// `timeout`.
    #[must_use]
    pub fn new(
        executor: &'a dyn CommandExecutor,
        binary: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            binary: binary.into(),
            timeout,
        }
    }
}

fn list_args(scope: &NamespaceScope, bundle: Option<&str>) -> Vec<String> {
    let selector = bundle.map_or_else(
        || MANAGED_BY_LABEL.to_owned(),
        |name| format!("{MANAGED_BY_LABEL},{BUNDLE_LABEL}={name}"),
    );
    let mut args = vec![
        "get".to_owned(),
        "secrets".to_owned(),
        "-l".to_owned(),
        selector,
    ];
    match scope {
        NamespaceScope::All => args.push("--all-namespaces".to_owned()),
        NamespaceScope::Named(namespace) => {
            args.push("--namespace".to_owned());
            args.push(namespace.clone());
        }
    }
    args.push("-o".to_owned());
    args.push("json".to_owned());
    args
}

impl InstanceStore for KubectlInventory<'_> {
    fn list(
        &self,
        scope: &NamespaceScope,
        bundle: Option<&str>,
    ) -> Result<Vec<Instance>, InventoryError> {
        let args = list_args(scope, bundle);
        log::debug!("running {} {}", self.binary, args.join(" "));
        let output = self.executor.run(&self.binary, &args, self.timeout)?;
        if !output.status.success() {
            return Err(InventoryError::Query {
                reason: failure_summary(&output),
            });
        }
        let mut instances = decode_secret_list(&output.stdout)?;
        instances.sort_by(|a, b| {
            a.namespace
                .cmp(&b.namespace)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(instances)
    }
}

#[derive(Debug, Deserialize)]
struct SecretList {
    #[serde(default)]
    items: Vec<Secret>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObjectMeta {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Secret {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InstancePayload {
    metadata: ObjectMeta,
    module: ModuleInfo,
    last_transition_time: String,
}

fn decode_secret_list(stdout: &[u8]) -> Result<Vec<Instance>, InventoryError> {
    let list: SecretList = serde_json::from_slice(stdout).map_err(|e| InventoryError::Decode {
        what: "secret list".to_owned(),
        reason: e.to_string(),
    })?;
    list.items
        .into_iter()
        .filter_map(|secret| {
            let encoded = secret.data.get(INSTANCE_KEY)?;
            Some(decode_instance(secret.metadata, encoded))
        })
        .collect()
}

fn decode_instance(secret: ObjectMeta, encoded: &str) -> Result<Instance, InventoryError> {
    let what = format!("instance in secret {}/{}", secret.namespace, secret.name);
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| InventoryError::Decode {
            what: what.clone(),
            reason: e.to_string(),
        })?;
    let payload: InstancePayload =
        serde_json::from_slice(&raw).map_err(|e| InventoryError::Decode {
            what,
            reason: e.to_string(),
        })?;

    let mut labels = secret.labels;
    labels.extend(payload.metadata.labels);
    Ok(Instance {
        name: non_empty_or(payload.metadata.name, secret.name),
        namespace: non_empty_or(payload.metadata.namespace, secret.namespace),
        module: payload.module,
        last_transition_time: payload.last_transition_time,
        labels,
    })
}

fn non_empty_or(value: String, fallback: String) -> String {
    if value.is_empty() { fallback } else { value }
}

/// Render `instances` as a borderless, left-aligned table.
///
/// The namespace column is included only when listing every namespace.
///
/// # Examples
///
/// ```
/// use modpull::inventory::{Instance, render_table};
///
/// let table = render_table(&[Instance { name: "podinfo".to_owned(), ..Instance::default() }], false);
/// assert!(table.starts_with("NAME"));
/// assert!(table.contains("podinfo"));
/// ```
#[must_use]
pub fn render_table(instances: &[Instance], all_namespaces: bool) -> String {
    let mut header = vec!["NAME"];
    if all_namespaces {
        header.push("NAMESPACE");
    }
    header.extend(["MODULE", "VERSION", "LAST APPLIED", "BUNDLE"]);

    let rows: Vec<Vec<&str>> = instances
        .iter()
        .map(|instance| {
            let mut row = vec![instance.name.as_str()];
            if all_namespaces {
                row.push(instance.namespace.as_str());
            }
            row.extend([
                instance.module.repository.as_str(),
                instance.module.version.as_str(),
                instance.last_transition_time.as_str(),
                instance.bundle().unwrap_or("-"),
            ]);
            row
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut table = String::new();
    for row in std::iter::once(&header).chain(&rows) {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        table.push_str(cells.join("\t").trim_end());
        table.push('\n');
    }
    table
}
