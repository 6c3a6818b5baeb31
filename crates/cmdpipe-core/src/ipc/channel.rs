//! Request/response hand-off between the IPC thread and the execution thread
//!
//! Both queues sit behind a single mutex. Every critical section is a
//! single push or pop; no processing happens while the lock is held.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::command::Request;

#[derive(Default)]
struct Queues {
    requests: VecDeque<Request>,
    responses: VecDeque<String>,
}

/// Shared state between the pipe server and the execution context
///
/// Constructed once at subsystem start and shared behind an `Arc`.
pub struct IpcChannel {
    queues: Mutex<Queues>,
    response_ready: Condvar,
    running: AtomicBool,
}

impl IpcChannel {
    /// Create a channel with empty queues and the run flag set
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            response_ready: Condvar::new(),
            running: AtomicBool::new(true),
        }
    }

    /// Check the run flag
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the run flag and wake any response waiter
    ///
    /// Returns true for the call that actually cleared the flag.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        // Take the lock so a waiter cannot miss the notification between
        // checking the flag and parking.
        let _queues = self.queues.lock();
        self.response_ready.notify_all();
        was_running
    }

    /// Queue a request for the execution thread
    pub fn push_request(&self, request: Request) {
        self.queues.lock().requests.push_back(request);
    }

    /// Take the oldest pending request, if any (never blocks)
    pub fn pop_request(&self) -> Option<Request> {
        self.queues.lock().requests.pop_front()
    }

    /// Queue a response for the pipe server
    ///
    /// Empty responses mean "nothing to send" and are dropped.
    pub fn push_response(&self, response: String) {
        if response.is_empty() {
            tracing::warn!("Empty response generated for request, nothing to queue");
            return;
        }
        let mut queues = self.queues.lock();
        queues.responses.push_back(response);
        self.response_ready.notify_one();
    }

    /// Take the oldest pending response, if any (never blocks)
    pub fn pop_response(&self) -> Option<String> {
        self.queues.lock().responses.pop_front()
    }

    /// Wait up to `window` for a response, re-checking every `interval`
    ///
    /// Returns early with `None` once the run flag is cleared. A response
    /// that arrives after the window stays queued.
    pub fn wait_response(&self, window: Duration, interval: Duration) -> Option<String> {
        // An unrepresentable deadline means waiting until stopped
        let deadline = Instant::now().checked_add(window);
        let mut queues = self.queues.lock();
        loop {
            if let Some(response) = queues.responses.pop_front() {
                return Some(response);
            }
            if !self.is_running() {
                return None;
            }
            let step = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };
            self.response_ready.wait_for(&mut queues, step);
        }
    }

    /// Number of requests waiting for the execution thread
    pub fn pending_requests(&self) -> usize {
        self.queues.lock().requests.len()
    }

    /// Number of responses waiting for the pipe server
    pub fn pending_responses(&self) -> usize {
        self.queues.lock().responses.len()
    }
}

impl Default for IpcChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_queues_are_fifo() {
        let channel = IpcChannel::new();
        channel.push_request(Request::Ping);
        channel.push_request(Request::GetTimeMs);
        assert_eq!(channel.pop_request(), Some(Request::Ping));
        assert_eq!(channel.pop_request(), Some(Request::GetTimeMs));
        assert_eq!(channel.pop_request(), None);

        channel.push_response("PONG".to_string());
        channel.push_response("TIME_MS:1".to_string());
        assert_eq!(channel.pop_response().as_deref(), Some("PONG"));
        assert_eq!(channel.pop_response().as_deref(), Some("TIME_MS:1"));
        assert_eq!(channel.pop_response(), None);
    }

    #[test]
    fn test_empty_response_not_queued() {
        let channel = IpcChannel::new();
        channel.push_response(String::new());
        assert_eq!(channel.pending_responses(), 0);
    }

    #[test]
    fn test_stop_only_once() {
        let channel = IpcChannel::new();
        assert!(channel.is_running());
        assert!(channel.stop());
        assert!(!channel.is_running());
        assert!(!channel.stop());
        assert!(!channel.is_running());
    }

    #[test]
    fn test_wait_response_returns_queued_response() {
        let channel = IpcChannel::new();
        channel.push_response("PONG".to_string());
        let response = channel.wait_response(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(response.as_deref(), Some("PONG"));
        assert_eq!(channel.pending_responses(), 0);
    }

    #[test]
    fn test_wait_response_times_out() {
        let channel = IpcChannel::new();
        let start = Instant::now();
        let response = channel.wait_response(Duration::from_millis(60), Duration::from_millis(10));
        assert!(response.is_none());
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_wait_response_wakes_on_push() {
        let channel = Arc::new(IpcChannel::new());
        let producer = channel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.push_response("CP:3".to_string());
        });

        let response = channel.wait_response(Duration::from_secs(2), Duration::from_millis(500));
        assert_eq!(response.as_deref(), Some("CP:3"));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_response_abandoned_on_stop() {
        let channel = Arc::new(IpcChannel::new());
        let stopper = channel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.stop();
        });

        let start = Instant::now();
        let response = channel.wait_response(Duration::from_secs(5), Duration::from_secs(1));
        assert!(response.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_response_unbounded_window() {
        let channel = Arc::new(IpcChannel::new());
        let stopper = channel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.stop();
        });

        let response = channel.wait_response(Duration::MAX, Duration::from_millis(10));
        assert!(response.is_none());
        handle.join().unwrap();
    }

    #[test]
    fn test_late_response_stays_queued() {
        let channel = IpcChannel::new();
        assert!(channel
            .wait_response(Duration::from_millis(20), Duration::from_millis(10))
            .is_none());
        channel.push_response("TIME_MS:5".to_string());
        assert_eq!(channel.pending_responses(), 1);
    }

    #[test]
    fn test_concurrent_producers_and_consumers_see_whole_values() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let channel = Arc::new(IpcChannel::new());
        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let channel = channel.clone();
            producers.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let code = format!("{}:{}", p, i);
                    channel.push_request(Request::ExecLua { code: code.clone() });
                    channel.push_response(format!("LUA_RESULT:{}", code));
                }
            }));
        }

        let consumer_channel = channel.clone();
        let consumer = thread::spawn(move || {
            let mut requests = Vec::new();
            let mut responses = Vec::new();
            while requests.len() < PRODUCERS * PER_PRODUCER
                || responses.len() < PRODUCERS * PER_PRODUCER
            {
                if let Some(request) = consumer_channel.pop_request() {
                    requests.push(request);
                }
                if let Some(response) = consumer_channel.pop_response() {
                    responses.push(response);
                }
            }
            (requests, responses)
        });

        for producer in producers {
            producer.join().unwrap();
        }
        let (requests, responses) = consumer.join().unwrap();

        // Per-producer order is preserved and every value is intact
        let mut next = [0usize; PRODUCERS];
        for request in &requests {
            let Request::ExecLua { code } = request else {
                panic!("unexpected request {:?}", request);
            };
            let (p, i) = code.split_once(':').unwrap();
            let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
            assert_eq!(i, next[p]);
            next[p] += 1;
        }
        assert!(next.iter().all(|&n| n == PER_PRODUCER));

        for response in &responses {
            let body = response.strip_prefix("LUA_RESULT:").unwrap();
            let (p, i) = body.split_once(':').unwrap();
            assert!(p.parse::<usize>().unwrap() < PRODUCERS);
            assert!(i.parse::<usize>().unwrap() < PER_PRODUCER);
        }
        assert_eq!(channel.pending_requests(), 0);
        assert_eq!(channel.pending_responses(), 0);
    }
}
