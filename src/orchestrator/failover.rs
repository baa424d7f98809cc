//! Failover script: identical to switchover except `D` is unreachable, so
//! its demote and GTID refresh are skipped in favor of its last-observed
//! state.

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
    let (ok, reason) = gate::can_be_demoted_failover(&d_snap);
    if !ok {
        return Err(Error::NotUsable(d.name.clone(), reason));
    }
    let p_snap = p.snapshot();
    let (ok, reason) = gate::can_be_promoted(&p_snap, OpKind::Failover, &d.host, d.port);
    if !ok {
        return Err(Error::NotUsable(p.name.clone(), reason));
    }

    let mut op_ctx = orch.new_op_ctx(orch.config.failover_timeout);

    // D is unreachable: only remove P's channel to it.
    if let Some(channel) = p_snap.channel_to(&d.host, d.port) {
        p.reset_slave_conn(&channel.name, &mut op_ctx.deadline_remaining).await?;
    }

    // Redirect every other slave of D onto P, same as switchover step 2.
    for other in orch.agents {
        if std::ptr::eq(other, p) || std::ptr::eq(other, d) {
            continue;
        }
        let snap = other.snapshot();
        if let Some(channel) = snap.channel_to(&d.host, d.port) {
            other.redirect_existing_slave_conn(&mut op_ctx, channel, p).await?;
        }
    }

    // Catch up against D's last-known binlog position; nothing fresher is
    // obtainable since D cannot be queried.
    p.catchup_to_master(&mut op_ctx, &d_snap.gtid_binlog_pos).await?;

    // merge_slave_conns: adopt D's last-known channels, filtering any that
    // target P by id/host:port or duplicate a channel P already has.
    let plan_p = ServerOperation {
        to_from_master: true,
        handle_events: true,
        events_to_enable: d_snap.enabled_events.clone(),
        conns_to_copy: d_snap.slave_status.clone(),
        sql_file: orch.config.promotion_sql_file.clone(),
    };
    p.promote(&mut op_ctx, &plan_p, OpKind::Failover, d).await?;

    if !op_ctx.error_sink.is_empty() {
        return Err(Error::Orchestration(op_ctx.error_sink.to_json().to_string()));
    }
    Ok(())
}
