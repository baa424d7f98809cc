//! Switchover script.

use crate::error::{Error, Result};
use crate::op_context::ServerOperation;
use crate::server::gate::{self, OpKind};

use super::Orchestrator;

pub async fn run(orch: &Orchestrator<'_>, demote_name: &str, promote_name: &str) -> Result<()> {
    let d = orch
        .find(demote_name)
        .ok_or_else(|| Error::NoSuchServer(demote_name.into()))?;
    let p = orch
        .find(promote_name)
        .ok_or_else(|| Error::NoSuchServer(promote_name.into()))?;

    let d_snap = d.snapshot();
    let (ok, reason) = gate::can_be_demoted_switchover(&d_snap);
    if !ok {
        return Err(Error::NotUsable(d.name.clone(), reason));
    }
    let p_snap = p.snapshot();
    let (ok, reason) = gate::can_be_promoted(&p_snap, OpKind::Switchover, &d.host, d.port);
    if !ok {
        return Err(Error::NotUsable(p.name.clone(), reason));
    }

    let mut op_ctx = orch.new_op_ctx(orch.config.switchover_timeout);

    let d_channels = d_snap.slave_status.clone();
    let d_events = d_snap.enabled_events.clone();

    // 1. D.demote(): reset D's own channels, clear MASTER, evict super
    // users, read_only=1, disable events, run the demotion SQL file, flush
    // logs, re-read GTID.
    let plan_d = ServerOperation {
        to_from_master: true,
        sql_file: orch.config.demotion_sql_file.clone(),
        ..Default::default()
    };
    d.demote(&mut op_ctx, &plan_d).await?;

    // 2. redirect every slave of D (other than P) onto P.
    for other in orch.agents {
        if std::ptr::eq(other, p) || std::ptr::eq(other, d) {
            continue;
        }
        let snap = other.snapshot();
        if let Some(channel) = snap.channel_to(&d.host, d.port) {
            other.redirect_existing_slave_conn(&mut op_ctx, channel, p).await?;
        }
    }

    // 3. P catches up to D's post-flush binlog position.
    let catchup_target = d.snapshot().gtid_binlog_pos;
    p.catchup_to_master(&mut op_ctx, &catchup_target).await?;

    // 4. P.promote(): reset P's channels, flip read_only, enable D's
    // events, adopt D's saved channel list minus the one to D itself.
    let plan_p = ServerOperation {
        to_from_master: true,
        handle_events: true,
        events_to_enable: d_events,
        conns_to_copy: d_channels
            .into_iter()
            .filter(|c| !(c.master_host == d.host && c.master_port == d.port))
            .collect(),
        sql_file: orch.config.promotion_sql_file.clone(),
    };
    p.promote(&mut op_ctx, &plan_p, OpKind::Switchover, d).await?;

    if !op_ctx.error_sink.is_empty() {
        return Err(Error::Orchestration(op_ctx.error_sink.to_json().to_string()));
    }
    Ok(())
}
