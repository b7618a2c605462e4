//! 处理器状态快照（供 get_status / CLI 展示）

use serde::Serialize;

/// 研究处理器当前状态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStatus {
    pub is_processing: bool,
    pub current_step: Option<String>,
    /// 毫秒时间戳
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub completed_steps: Vec<String>,
    /// 最近一次运行是否被中止
    pub aborted: bool,
    /// 最近一次运行的错误
    pub last_error: Option<String>,
}

impl ProcessorStatus {
    /// 新一轮运行开始时的状态
    pub fn started(now_ms: i64) -> Self {
        Self {
            is_processing: true,
            started_at: Some(now_ms),
            ..Self::default()
        }
    }

    /// 运行结束（无论成功、失败或中止）
    pub fn finish(&mut self, now_ms: i64) {
        self.is_processing = false;
        self.current_step = None;
        if self.finished_at.is_none() {
            self.finished_at = Some(now_ms);
        }
    }
}
