// portal.rs

use log::*;

use crate::*;

/// Time between accepting a portal request and restarting, so the HTTP
/// response still reaches the client.
pub const RESTART_DELAY_MS: u64 = 3_000;

/// Builds a candidate record from `form`, persists it if it is complete and
/// arms the restart timer. The live record is never touched; on failure the
/// store keeps its previous contents.
pub fn apply_config<S: Storage>(
    store: &mut ConfigStore<S>,
    restart: &RestartTimer,
    form: &ConfigForm,
    now_ms: u64,
) -> Result<ConfigRecord, ApplyError> {
    let mut candidate = ConfigRecord::from_form(form)?;
    candidate.check_required()?;

    info!("Saving new config...");
    store.save(&mut candidate)?;

    info!("Config saved. Restarting in {RESTART_DELAY_MS} ms...");
    restart.schedule(now_ms, RESTART_DELAY_MS);
    Ok(candidate)
}

/// Erases the stored config and arms the restart timer.
pub fn reset_config<S: Storage>(
    store: &mut ConfigStore<S>,
    restart: &RestartTimer,
    now_ms: u64,
) -> anyhow::Result<()> {
    store.erase()?;
    info!("Config erased. Restarting in {RESTART_DELAY_MS} ms...");
    restart.schedule(now_ms, RESTART_DELAY_MS);
    Ok(())
}


// EOF
