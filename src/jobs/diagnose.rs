//! 诊断映射：原始诊断文本 → 错误码 → 修复策略
//!
//! 纯函数，两级映射都不做猜测：文本未命中任何模式给 unknown_error，
//! unknown_error 没有修复建议，重试循环随之停止。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use crate::jobs::{FixStrategy, JobErrorCode};

fn patterns() -> &'static [(JobErrorCode, Regex)] {
    static CACHED: OnceLock<Vec<(JobErrorCode, Regex)>> = OnceLock::new();
    CACHED.get_or_init(|| {
        let table: &[(JobErrorCode, &str)] = &[
            (
                JobErrorCode::ScfDiverged,
                r"(?i)scf.*(diverg|not converg|failed to converge)|convergence failure",
            ),
            (
                JobErrorCode::OutOfMemory,
                r"(?i)out of memory|oom-?kill|std::bad_alloc|insufficient memory",
            ),
            (
                JobErrorCode::WalltimeExceeded,
                r"(?i)walltime|wall.?clock limit|due to time limit|job exceeded.*time",
            ),
            (
                JobErrorCode::DiskQuota,
                r"(?i)disk quota|no space left on device",
            ),
            (
                JobErrorCode::BadInput,
                r"(?i)invalid (input|keyword|basis set)|syntax error in input|unrecognized option",
            ),
        ];
        table
            .iter()
            .map(|(code, pattern)| {
                (*code, Regex::new(pattern).expect("diagnose regex must compile"))
            })
            .collect()
    })
}

/// 诊断文本 → 错误码；首个命中的模式生效
pub fn classify(text: &str) -> JobErrorCode {
    for (code, regex) in patterns() {
        if regex.is_match(text) {
            return *code;
        }
    }
    JobErrorCode::UnknownError
}

/// 错误码 → 修复策略；unknown_error 与 bad_input 无自动修复
pub fn fix_for(code: JobErrorCode) -> Option<FixStrategy> {
    let (summary, deltas) = match code {
        JobErrorCode::ScfDiverged => (
            "tighten SCF damping and raise the iteration cap",
            json!({ "scf_damping": 0.7, "scf_max_iterations": 300 }),
        ),
        JobErrorCode::OutOfMemory => (
            "request more memory per task",
            json!({ "memory_mb": 8192 }),
        ),
        JobErrorCode::WalltimeExceeded => (
            "extend the walltime limit",
            json!({ "walltime_hours": 24 }),
        ),
        JobErrorCode::DiskQuota => (
            "redirect scratch files to the large scratch volume",
            json!({ "scratch_dir": "/scratch" }),
        ),
        // 输入本身不对没有可自动化的参数增量
        JobErrorCode::BadInput | JobErrorCode::UnknownError => return None,
    };
    let param_deltas = deltas.as_object().cloned().unwrap_or_default();
    Some(FixStrategy {
        summary: summary.to_string(),
        param_deltas,
    })
}
