use serde_json::Value;

use realmsync_core::{DesiredState, ResourceKind};

use super::{ImportSummary, SubImporter};
use crate::error::{ImportError, RemoteError};
use crate::remote::RemoteApi;

const MANAGEMENT_CLIENT: &str = "realm-management";
const IMPERSONATION_ROLE: &str = "impersonation";

/// Options that are not part of the remote schema (`customImport`).
pub struct CustomImporter;

impl SubImporter for CustomImporter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CustomImport
    }

    fn reconcile(
        &self,
        remote: &dyn RemoteApi,
        desired: &DesiredState,
    ) -> Result<ImportSummary, ImportError> {
        let mut summary = ImportSummary::default();
        let remove = desired
            .custom_import
            .as_ref()
            .is_some_and(|c| c.remove_impersonation);
        if remove {
            if remove_impersonation(remote, desired)? {
                summary.deleted += 1;
            } else {
                summary.unchanged += 1;
            }
        }
        Ok(summary)
    }
}

/// Returns whether the role was present.
fn remove_impersonation(remote: &dyn RemoteApi, desired: &DesiredState) -> Result<bool, ImportError> {
    let target = desired.target();
    let remote_err = |source: RemoteError| ImportError::Remote {
        kind: ResourceKind::ClientRole,
        name: IMPERSONATION_ROLE.to_string(),
        source,
    };

    let roles = match remote.list(target, ResourceKind::ClientRole, Some(MANAGEMENT_CLIENT)) {
        Ok(roles) => roles,
        Err(RemoteError::NotFound { .. }) => return Ok(false),
        Err(e) => return Err(remote_err(e)),
    };
    let present = roles
        .iter()
        .any(|r| r.get("name").and_then(Value::as_str) == Some(IMPERSONATION_ROLE));
    if !present {
        tracing::debug!("impersonation role already absent in {}", target);
        return Ok(false);
    }

    match remote.delete_resource(
        target,
        ResourceKind::ClientRole,
        Some(MANAGEMENT_CLIENT),
        IMPERSONATION_ROLE,
    ) {
        Ok(()) => {
            tracing::info!("removed impersonation role from {}", target);
            Ok(true)
        }
        Err(RemoteError::NotFound { .. }) => Ok(false),
        Err(e) => Err(remote_err(e)),
    }
}
