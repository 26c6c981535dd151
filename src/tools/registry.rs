//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / input_schema / execute），由 ToolRegistry 注册；
//! 注册时把名称与别名统一归一化（大小写折叠、分隔符折叠为 `_`）写入查找表，重名时后注册者覆盖。
//! ToolExecutor 在调用时加超时并统一转为结构化结果。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static SEPARATOR_RE: OnceLock<Regex> = OnceLock::new();

/// 工具名归一化：`Code-Read`、`code.read`、` CODE__read ` 都映射为 `code_read`
pub fn normalize_tool_name(name: &str) -> String {
    let re = SEPARATOR_RE.get_or_init(|| Regex::new(r"[\s\-_./:]+").unwrap());
    let lowered = name.trim().to_lowercase();
    re.replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// 工具类别：普通函数工具，或委派给子 Agent 的工具（需要注入共享上下文并合并补丁）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Function,
    SubAgent,
}

/// 参数 schema：字段名 → 描述，以及必填子集；既用于执行前校验，也用于向决策预言机宣告可调用动作
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSchema {
    pub fields: BTreeMap<String, String>,
    pub required: Vec<String>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.fields.insert(name.into(), description.into());
        self
    }

    pub fn required_field(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.insert(name.clone(), description.into());
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    /// 缺失的必填字段
    pub fn missing_required(&self, params: &Value) -> Vec<String> {
        self.required
            .iter()
            .filter(|f| params.get(f.as_str()).map(Value::is_null).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, desc)| (name.clone(), serde_json::json!({ "description": desc })))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// 工具 trait：名称、描述（供决策预言机理解）、参数 schema、可选超时、异步执行（params 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 别名，与 name 一起参与归一化查找
    fn aliases(&self) -> Vec<String> {
        Vec::new()
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::default()
    }

    /// 单独的超时；None 时使用执行器默认值
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Function
    }

    /// 执行工具；返回对象中的 `success` 字段（缺省 true）决定成败
    async fn execute(&self, params: Value) -> Result<Value, String>;
}

/// 宣告给决策预言机的工具描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具注册表：按注册顺序保存工具，归一化名 / 别名 → 工具
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    lookup: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let mut keys = vec![normalize_tool_name(tool.name())];
        keys.extend(tool.aliases().iter().map(|a| normalize_tool_name(a)));
        for key in keys.into_iter().filter(|k| !k.is_empty()) {
            if let Some(prev) = self.lookup.insert(key.clone(), tool.clone()) {
                if !Arc::ptr_eq(&prev, &tool) {
                    tracing::debug!(key = %key, previous = prev.name(), tool = tool.name(), "tool key overwritten");
                }
            }
        }
        self.tools.push(tool);
    }

    /// 按名称或别名解析（先归一化）
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.lookup.get(&normalize_tool_name(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 仍可通过自身名称解析到的工具（被覆盖的旧注册不再宣告）
    fn live_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|t| {
                self.lookup
                    .get(&normalize_tool_name(t.name()))
                    .map(|hit| Arc::ptr_eq(hit, t))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.live_tools().iter().map(|t| t.name().to_string()).collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.live_tools()
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema().to_json_schema(),
            })
            .collect()
    }

    /// 白名单子注册表（用于沙箱子 Agent）；白名单按归一化名匹配
    pub fn restricted<S: AsRef<str>>(&self, whitelist: &[S]) -> ToolRegistry {
        let allowed: HashSet<String> = whitelist
            .iter()
            .map(|s| normalize_tool_name(s.as_ref()))
            .collect();
        let mut child = ToolRegistry::new();
        for tool in self.live_tools() {
            if allowed.contains(&normalize_tool_name(tool.name())) {
                child.register_arc(tool);
            }
        }
        child
    }

    /// 动态生成工具 schema JSON，拼入 prompt
    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.descriptors()).unwrap_or_else(|_| "[]".to_string())
    }
}
