use mockprep_booking::BookingOrchestrator;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_holds: usize,
    pub lapsed_pay_later: usize,
}

/// One pass: drop lapsed holds, then cancel pay-later bookings past their payment deadline.
/// A failing half is logged and does not stop the other.
pub async fn sweep_once(orchestrator: &BookingOrchestrator) -> SweepReport {
    let mut report = SweepReport::default();

    match orchestrator.reservations().sweep().await {
        Ok(count) => report.expired_holds = count,
        Err(e) => error!("Hold sweep failed: {}", e),
    }

    match orchestrator.ledger().release_lapsed_pay_later().await {
        Ok(released) => report.lapsed_pay_later = released.len(),
        Err(e) => error!("Pay-later sweep failed: {}", e),
    }

    report
}

pub async fn start_sweeper(orchestrator: BookingOrchestrator, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Sweeper started, running every {:?}", every);

    loop {
        ticker.tick().await;
        let report = sweep_once(&orchestrator).await;
        if report != SweepReport::default() {
            info!(
                "Sweep released {} holds and {} lapsed pay-later bookings",
                report.expired_holds, report.lapsed_pay_later
            );
        }
    }
}
