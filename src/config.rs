//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `APIARY__*` 覆盖（双下划线表示嵌套，如 `APIARY__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub eval: EvalSection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// [app] 段：应用名与默认 AUT 规格文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 默认加载的 AUT 规格（JSON），命令行参数可覆盖
    pub aut_spec: Option<PathBuf>,
}

/// [llm] 段：裁判 / 规划 Oracle 的后端选择与超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// 后端：openai（任意兼容端点）/ mock（本地调试，无需 API）
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

/// [eval] 段：批量评估的并发上限与单用例超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvalSection {
    /// 同时在途的 AUT 调用数上限
    pub concurrency: usize,
    /// 单次 AUT 调用超时（秒）；超时按单用例失败处理，不中断整批
    pub aut_timeout_secs: u64,
    /// 单次裁判调用超时（秒）；超时记为 judge_unavailable
    pub judge_timeout_secs: u64,
}

impl Default for EvalSection {
    fn default() -> Self {
        Self {
            concurrency: 4,
            aut_timeout_secs: 60,
            judge_timeout_secs: 30,
        }
    }
}

/// [planner] 段：规划 Oracle 与 Prompt 上下文裁剪
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// 规划模型，未设置时沿用 [llm] 的 model
    pub model: Option<String>,
    /// 注入 Prompt 的最佳实践条数上限（按时间倒序截取）
    pub max_best_practices: usize,
    /// 失败报告中单条输出的截断长度（字符）
    pub report_truncate_chars: usize,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            model: None,
            max_best_practices: 10,
            report_truncate_chars: 500,
        }
    }
}

/// [store] 段：追踪与最佳实践记忆的 JSONL 路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub traces_path: PathBuf,
    pub memory_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            traces_path: PathBuf::from("data/traces.jsonl"),
            memory_path: PathBuf::from("data/memory/bank.jsonl"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            eval: EvalSection::default(),
            planner: PlannerSection::default(),
            store: StoreSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 APIARY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 APIARY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("APIARY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
