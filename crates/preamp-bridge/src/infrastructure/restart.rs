//! Process restart after the saved credentials are cleared.
//!
//! On Unix the running binary replaces itself with a fresh copy (same path,
//! same arguments), so a supervisor such as systemd sees no exit at all.
//! Elsewhere the process exits and relies on its supervisor to start it again.

use tracing::{error, info};

/// Restarts the current process.
pub fn restart_process() -> ! {
    info!("restarting process");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        match std::env::current_exe() {
            Ok(exe) => {
                let err = std::process::Command::new(exe)
                    .args(std::env::args_os().skip(1))
                    .exec();
                error!("re-exec failed: {err}; exiting instead");
            }
            Err(e) => error!("cannot locate current executable: {e}; exiting instead"),
        }
    }

    std::process::exit(0);
}
