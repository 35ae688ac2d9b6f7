//! Host platform seam
//!
//! Permission dialogs and the "turn Bluetooth on" prompt belong to the host
//! application. The bridge only asks through [`PlatformHost`] and awaits the
//! answer.

use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Connect,
    Scan,
    FineLocation,
}

/// Which permissions a platform asks for before Bluetooth use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionModel {
    /// Separate connect and scan grants (Android 12 and later).
    Runtime,
    /// Location grant stands in for Bluetooth access (older Android).
    LegacyLocation,
    /// Desktop hosts: access is governed outside the process.
    NotRequired,
}

impl PermissionModel {
    /// Permissions `checkBluetoothPermissions` makes sure of.
    pub fn requested(&self) -> &'static [Permission] {
        match self {
            Self::Runtime => &[Permission::Connect, Permission::Scan],
            Self::LegacyLocation => &[Permission::FineLocation],
            Self::NotRequired => &[],
        }
    }

    /// Permissions checked before every Bluetooth operation. The legacy
    /// model does not gate operations, only scanning visibility.
    pub fn gating(&self) -> &'static [Permission] {
        match self {
            Self::Runtime => &[Permission::Connect, Permission::Scan],
            Self::LegacyLocation | Self::NotRequired => &[],
        }
    }
}

/// Snapshot of the grants. Queried per request, never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionState {
    pub connect: bool,
    pub scan: bool,
    pub location: bool,
}

impl PermissionState {
    pub fn all() -> Self {
        Self {
            connect: true,
            scan: true,
            location: true,
        }
    }

    pub fn granted(&self, permission: Permission) -> bool {
        match permission {
            Permission::Connect => self.connect,
            Permission::Scan => self.scan,
            Permission::FineLocation => self.location,
        }
    }

    pub fn all_granted(&self, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.granted(*p))
    }
}

#[async_trait]
pub trait PlatformHost: Send + Sync {
    fn platform_version(&self) -> String;

    fn permission_model(&self) -> PermissionModel;

    async fn permission_state(&self) -> PermissionState;

    /// Whether a foreground context exists to show a prompt in.
    fn has_foreground(&self) -> bool;

    /// Show the permission prompt; resolves with whether every permission
    /// was granted.
    async fn request_permissions(&self, permissions: &[Permission]) -> BridgeResult<bool>;

    /// Show the enable-Bluetooth prompt; resolves with the user's answer.
    async fn request_enable_adapter(&self) -> BridgeResult<bool>;
}

/// Host for desktop processes: no runtime permissions and no UI to prompt
/// from.
#[derive(Debug, Default)]
pub struct DesktopHost;

impl DesktopHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlatformHost for DesktopHost {
    fn platform_version(&self) -> String {
        let os = match std::env::consts::OS {
            "linux" => "Linux",
            "windows" => "Windows",
            "macos" => "macOS",
            other => other,
        };
        format!("{} {}", os, std::env::consts::ARCH)
    }

    fn permission_model(&self) -> PermissionModel {
        PermissionModel::NotRequired
    }

    async fn permission_state(&self) -> PermissionState {
        PermissionState::all()
    }

    fn has_foreground(&self) -> bool {
        false
    }

    async fn request_permissions(&self, _permissions: &[Permission]) -> BridgeResult<bool> {
        Ok(true)
    }

    async fn request_enable_adapter(&self) -> BridgeResult<bool> {
        Err(BridgeError::ActivityNotAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_model_gates_connect_and_scan() {
        let state = PermissionState {
            connect: true,
            scan: false,
            location: true,
        };
        assert!(!state.all_granted(PermissionModel::Runtime.gating()));
        assert!(state.all_granted(PermissionModel::LegacyLocation.gating()));
        assert!(state.all_granted(PermissionModel::LegacyLocation.requested()));
    }

    #[tokio::test]
    async fn test_desktop_host() {
        let host = DesktopHost::new();
        assert!(host.platform_version().contains(std::env::consts::ARCH));
        assert!(host
            .permission_state()
            .await
            .all_granted(host.permission_model().requested()));
        assert_eq!(
            host.request_enable_adapter().await,
            Err(BridgeError::ActivityNotAvailable)
        );
    }
}
