use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_CAPACITY: u32 = 1000;
pub const BLENDER_SERVICE: &str = "blender";

/// One block of an Afanasy job: a command run over a numeric frame range split into tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub service: String,
    pub capacity: u32,
    pub working_directory: String,
    pub command: String,
    pub numeric: bool,
    pub frame_first: i64,
    pub frame_last: i64,
    pub frames_per_task: i64,
    pub frames_inc: i64,
}

impl Block {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: BLENDER_SERVICE.to_owned(),
            capacity: DEFAULT_CAPACITY,
            working_directory: String::new(),
            command: command.into(),
            numeric: true,
            frame_first: 1,
            frame_last: 1,
            frames_per_task: 1,
            frames_inc: 1,
        }
    }

    pub fn set_numeric(&mut self, first: i64, last: i64, per_task: i64, increment: i64) {
        self.numeric = true;
        self.frame_first = first;
        self.frame_last = last;
        self.frames_per_task = per_task.max(1);
        self.frames_inc = increment.max(1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub user_name: String,
    pub host_name: String,
    pub priority: u32,
    pub time_creation: i64,
    pub blocks: Vec<Block>,
    /// Paused on arrival.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_running_tasks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_mask_exclude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depend_mask: Option<String>,
}

impl Job {
    /// New job owned by the current user on this host.
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        let user_name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_owned());
        let host_name = gethostname::gethostname().to_string_lossy().into_owned();
        Self {
            name: name.into(),
            user_name,
            host_name,
            priority,
            time_creation: chrono::Utc::now().timestamp(),
            blocks: Vec::new(),
            offline: None,
            branch: None,
            max_running_tasks: None,
            hosts_mask: None,
            hosts_mask_exclude: None,
            depend_mask: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlockStats {
    pub name: String,
    pub tasks: i64,
    pub percentage: i64,
    pub done: i64,
    pub error: i64,
    pub running: i64,
}

/// Progress summary read from a job info reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    pub id: i64,
    pub name: String,
    /// Afanasy state flags, e.g. `RDY RUN`.
    pub state: String,
    pub blocks: Vec<BlockStats>,
}

impl JobStats {
    pub fn from_job(job: &Value) -> Self {
        let int = |v: &Value, keys: &[&str]| -> i64 {
            keys.iter()
                .find_map(|k| v.get(*k).and_then(Value::as_i64))
                .unwrap_or(0)
        };
        let text = |v: &Value, key: &str| -> String {
            v.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_owned()
        };

        let blocks = job
            .get("blocks")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .map(|b| BlockStats {
                        name: text(b, "name"),
                        tasks: int(b, &["tasks_num", "tasksnumber"]),
                        percentage: int(b, &["p_percentage"]),
                        done: int(b, &["p_tasks_done"]),
                        error: int(b, &["p_tasks_error"]),
                        running: int(b, &["p_tasks_running"]),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: int(job, &["id"]),
            name: text(job, "name"),
            state: text(job, "state"),
            blocks,
        }
    }

    pub fn total_tasks(&self) -> i64 {
        self.blocks.iter().map(|b| b.tasks).sum()
    }

    pub fn done_tasks(&self) -> i64 {
        self.blocks.iter().map(|b| b.done).sum()
    }

    pub fn error_tasks(&self) -> i64 {
        self.blocks.iter().map(|b| b.error).sum()
    }

    pub fn running_tasks(&self) -> i64 {
        self.blocks.iter().map(|b| b.running).sum()
    }
}
