pub mod launcher;

pub use launcher::{LaunchCallback, LaunchFuture, LauncherHandle, MasterCommand, MasterLauncher};
