//! Key derivation for every entity the data store maintains.
//!
//! The layout is shared with existing deployments and must not change:
//!
//! | entity                | key                   | type   |
//! |-----------------------|-----------------------|--------|
//! | queue contents        | `queue:<name>`        | list   |
//! | queue registry        | `queues`              | set    |
//! | failed-queue registry | `failed_queues`       | set    |
//! | failure records       | `failed`              | list   |
//! | worker registry       | `workers`             | set    |
//! | worker payload        | `worker:<id>`         | string |
//! | worker start time     | `worker:<id>:started` | string |
//! | stats counter         | `stat:<name>`         | string |

pub static QUEUES: &str = "queues";
pub static FAILED_QUEUES: &str = "failed_queues";
pub static FAILED: &str = "failed";
pub static WORKERS: &str = "workers";

static QUEUE: &str = "queue";
static WORKER: &str = "worker";
static STAT: &str = "stat";

pub fn get_queue_key(queue_name: &str) -> String {
    format!("{}:{}", QUEUE, queue_name)
}

pub fn get_worker_key(worker_id: &str) -> String {
    format!("{}:{}", WORKER, worker_id)
}

pub fn get_worker_started_key(worker_id: &str) -> String {
    format!("{}:started", get_worker_key(worker_id))
}

pub fn get_stat_key(stat_name: &str) -> String {
    format!("{}:{}", STAT, stat_name)
}
