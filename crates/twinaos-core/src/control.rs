//! D-Bus trigger/progress interface constants and proxy definitions.

use zbus::proxy;

use crate::{DiskInfo, InstallRequest, RunStateView, WifiNetwork};

/// Well-known bus name for the installer service.
pub const INSTALLER_BUS_NAME: &str = "com.twinaos.Installer";
/// Object path for installer methods and signals.
pub const INSTALLER_OBJECT_PATH: &str = "/com/twinaos/Installer";
/// D-Bus interface name for installer calls.
pub const INSTALLER_INTERFACE: &str = "com.twinaos.Installer";

#[proxy(
    interface = "com.twinaos.Installer",
    default_service = "com.twinaos.Installer",
    default_path = "/com/twinaos/Installer"
)]
trait Installer {
    /// Schedule a run. Fails immediately when one is already running or the request is invalid.
    fn start_installation(&self, request: InstallRequest) -> zbus::Result<()>;

    /// Current run snapshot.
    fn get_status(&self) -> zbus::Result<RunStateView>;

    /// Block devices eligible as install targets.
    fn list_disks(&self) -> zbus::Result<Vec<DiskInfo>>;

    /// Visible wireless networks.
    fn list_wifi_networks(&self) -> zbus::Result<Vec<WifiNetwork>>;

    /// Join a wireless network; an empty password joins an open network.
    fn connect_wifi(&self, ssid: &str, password: &str) -> zbus::Result<String>;

    /// Reboot after a short grace period.
    fn reboot(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn install_progress(&self, percent: u8, message: String) -> zbus::Result<()>;

    #[zbus(signal)]
    fn install_error(&self, reason: String) -> zbus::Result<()>;
}
