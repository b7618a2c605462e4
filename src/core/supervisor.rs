//! 任务监管：每次运行持有一个新的 CancellationToken
//!
//! stop_processing 只触发取消；处理器在步骤边界检查，进行中的步骤会跑完。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 研究任务的取消令牌管理
#[derive(Debug, Default)]
pub struct TaskSupervisor {
    token: Mutex<CancellationToken>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新一轮运行：替换为未取消的新令牌并返回其克隆
    pub fn begin(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut guard = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *guard = fresh.clone();
        fresh
    }

    /// 请求取消当前运行
    pub fn cancel(&self) {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_cancelled()
    }
}
