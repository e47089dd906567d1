//! Client-side polling loop: re-fetch a scan's status at a fixed interval
//! until it reaches a terminal state.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::coordinator::ScanStatusReport;

#[derive(Debug, Error)]
pub enum PollError<E: std::error::Error + 'static> {
    #[error("status fetch failed: {0}")]
    Fetch(#[source] E),

    #[error("scan still in flight after {polls} polls")]
    Exhausted { polls: u32 },
}

/// Call `fetch` until it returns a terminal snapshot, sleeping `interval`
/// between calls. `on_snapshot` sees every snapshot, the terminal one
/// included. With `max_polls = None` the loop only ends on a terminal status
/// or a fetch error.
///
/// # Errors
///
/// Returns [`PollError::Fetch`] on the first failed fetch, or
/// [`PollError::Exhausted`] once `max_polls` snapshots were all in flight.
pub async fn poll_until_terminal<F, Fut, E, O>(
    mut fetch: F,
    interval: Duration,
    max_polls: Option<u32>,
    mut on_snapshot: O,
) -> Result<ScanStatusReport, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ScanStatusReport, E>>,
    E: std::error::Error + 'static,
    O: FnMut(&ScanStatusReport),
{
    let mut polls = 0u32;
    loop {
        let snapshot = fetch().await.map_err(PollError::Fetch)?;
        polls += 1;
        on_snapshot(&snapshot);

        if snapshot.is_terminal() {
            return Ok(snapshot);
        }
        if max_polls.is_some_and(|max| polls >= max) {
            return Err(PollError::Exhausted { polls });
        }
        tokio::time::sleep(interval).await;
    }
}
