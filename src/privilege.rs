//! Capability handling for the helper process.
//!
//! The helper starts with whatever elevation its installation grants
//! (`setcap cap_net_raw+ep` or setuid-root), keeps only what the single
//! `socket(2)` call needs, and sheds everything before the descriptor
//! handoff.

use capctl::{Cap, CapState};
use eyre::WrapErr;
use nix::unistd::{geteuid, getuid, setresuid};
use tracing::{debug, warn};

/// Whether this process can create raw packet sockets.
pub(crate) fn have_net_raw() -> bool {
    if geteuid().is_root() {
        return true;
    }
    match CapState::get_current() {
        Ok(state) => state.effective.has(Cap::NET_RAW),
        Err(_) => false,
    }
}

/// Reduce the capability state to the minimum needed for socket creation.
///
/// CAP_SETUID survives only for setuid-root installs, where [`drop_all`]
/// still needs it to shed the uid afterwards.
pub(crate) fn retain_net_raw_only() -> eyre::Result<()> {
    if let Err(err) = capctl::prctl::set_no_new_privs() {
        warn!("could not set no_new_privs: {err}");
    }

    let mut state = CapState::get_current().wrap_err("failed to read capability state")?;
    let keep_net_raw = state.permitted.has(Cap::NET_RAW);
    let keep_setuid = geteuid().is_root() && !getuid().is_root();

    state.effective.clear();
    state.permitted.clear();
    state.inheritable.clear();
    if keep_net_raw {
        state.effective.add(Cap::NET_RAW);
        state.permitted.add(Cap::NET_RAW);
    }
    if keep_setuid {
        state.effective.add(Cap::SETUID);
        state.permitted.add(Cap::SETUID);
    }
    state.set_current().wrap_err("failed to restrict capabilities")?;

    debug!(net_raw = keep_net_raw, setuid = keep_setuid, "capability state restricted");
    Ok(())
}

/// Irreversibly drop every remaining privilege: shed a setuid-root euid
/// back to the invoking user, then clear all capability sets.
pub(crate) fn drop_all() -> eyre::Result<()> {
    let ruid = getuid();
    if geteuid().is_root() && !ruid.is_root() {
        setresuid(ruid, ruid, ruid).wrap_err("failed to shed root uid")?;
    }

    let mut state = CapState::get_current().wrap_err("failed to read capability state")?;
    state.effective.clear();
    state.permitted.clear();
    state.inheritable.clear();
    state.set_current().wrap_err("failed to drop capabilities")?;

    debug!("privileges dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_does_not_panic() {
        // Valid under any privilege level the test runner happens to have.
        let _ = have_net_raw();
    }
}
