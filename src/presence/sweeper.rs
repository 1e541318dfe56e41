use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info};

use super::registry::ConnectionRegistry;
use crate::realtime::EventBus;

/// Every minute, at second zero.
const SWEEP_SCHEDULE: &str = "0 * * * * *";

fn scheduler_error(e: JobSchedulerError) -> anyhow::Error {
    anyhow::anyhow!("scheduler error: {:?}", e)
}

/// Starts the stale-connection sweep, which also drops bus channels whose
/// last subscriber went away. The returned scheduler must be kept alive for
/// the job to keep running.
pub async fn start_sweeper(registry: ConnectionRegistry, bus: EventBus) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;

    let job = Job::new_async(SWEEP_SCHEDULE, move |_id, _scheduler| {
        let registry = registry.clone();
        let bus = bus.clone();
        Box::pin(async move {
            prune_channels(&bus);
            match registry.sweep_stale().await {
                Ok(0) => {}
                Ok(offline) => info!(offline, "stale connection sweep took users offline"),
                Err(e) => error!("stale connection sweep failed: {}", e),
            }
        })
    })
    .map_err(scheduler_error)?;

    scheduler.add(job).await.map_err(scheduler_error)?;
    scheduler.start().await.map_err(scheduler_error)?;

    info!("Stale connection sweeper scheduled ({})", SWEEP_SCHEDULE);
    Ok(scheduler)
}

fn prune_channels(bus: &EventBus) -> usize {
    let pruned = bus.prune();
    if pruned > 0 {
        debug!(pruned, "dropped idle event channels");
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::events::Channel;

    #[test]
    fn sweep_drops_channels_of_closed_connections_only() {
        let bus = EventBus::local(8);
        let gone = bus.subscribe(Channel::Conversation(1));
        let _live = bus.subscribe(Channel::User(2));
        drop(gone);

        assert_eq!(prune_channels(&bus), 1);
        assert_eq!(bus.channel_count(), 1);
        assert_eq!(bus.subscriber_count(Channel::User(2)), 1);
        assert_eq!(prune_channels(&bus), 0);
    }
}
