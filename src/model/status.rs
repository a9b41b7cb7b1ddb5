/// Visible install state of one catalog item.
///
/// Uninstalling is an action taken from `Installed`, never a resting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallStatus {
    #[default]
    Install,
    Installing,
    Installed,
}

impl InstallStatus {
    pub fn from_snapshot(is_installed: bool) -> Self {
        if is_installed {
            InstallStatus::Installed
        } else {
            InstallStatus::Install
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InstallStatus::Install => "install",
            InstallStatus::Installing => "installing...",
            InstallStatus::Installed => "installed",
        }
    }
}
