use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// One node of the user-authored block graph. Value sockets hold at most one
/// child block id; statement sockets hold the id of the first block of a
/// sibling chain linked through `next`. The editor guarantees the chains are
/// acyclic; the compiler assumes it.
#[derive(Debug, Clone, Default)]
pub struct BlockInstance {
    pub id: String,
    pub kind: String,
    pub top_level: bool,
    pub x: i64,
    pub y: i64,
    pub fields: BTreeMap<String, Value>,
    pub inputs: BTreeMap<String, String>,
    pub statements: BTreeMap<String, String>,
    pub next: Option<String>,
}

impl BlockInstance {
    pub fn field_str(&self, name: &str) -> Option<String> {
        let value = self.fields.get(name)?;
        if let Some(s) = value.as_str() {
            return Some(s.to_string());
        }
        if let Some(b) = value.as_bool() {
            return Some(if b { "true" } else { "false" }.to_string());
        }
        value.as_f64().map(|n| format_number(n))
    }

    pub fn field_bool(&self, name: &str) -> bool {
        match self.fields.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub id: String,
    pub name: String,
    pub is_list: bool,
    pub initial: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
        }
    }
}

/// The in-memory workspace: variable table, block graph, and the raw list
/// document (consumed by the list store, which resolves it against the
/// variable table).
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub settings: Settings,
    pub variables: Vec<Variable>,
    pub blocks: BTreeMap<String, BlockInstance>,
    pub lists_document: Option<Value>,
}

impl Workspace {
    pub fn from_json_str(doc: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(doc)
            .map_err(|e| anyhow!("Invalid workspace document: {}.", e))?;
        Self::from_value(&value)
    }

    pub fn from_value(doc: &Value) -> Result<Self> {
        let obj = doc
            .as_object()
            .ok_or_else(|| anyhow!("Workspace document must be a JSON object."))?;

        let mut settings = Settings::default();
        if let Some(prefix) = obj
            .get("settings")
            .and_then(|s| s.get("prefix"))
            .and_then(Value::as_str)
        {
            if !prefix.is_empty() {
                settings.prefix = prefix.to_string();
            }
        }

        let mut variables = Vec::new();
        if let Some(arr) = obj.get("variables").and_then(Value::as_array) {
            for entry in arr {
                let Some(id) = entry.get("id").and_then(Value::as_str) else {
                    continue;
                };
                let name = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(id)
                    .to_string();
                let is_list = entry
                    .get("kind")
                    .and_then(Value::as_str)
                    .map(|k| k == "list")
                    .unwrap_or(false);
                let initial = entry
                    .get("value")
                    .and_then(Value::as_str)
                    .map(ToString::to_string);
                variables.push(Variable {
                    id: id.to_string(),
                    name,
                    is_list,
                    initial,
                });
            }
        }

        let mut blocks = BTreeMap::new();
        if let Some(map) = obj.get("blocks").and_then(Value::as_object) {
            for (id, raw) in map {
                blocks.insert(id.clone(), parse_block(id, raw)?);
            }
        }

        Ok(Self {
            settings,
            variables,
            blocks,
            lists_document: obj.get("lists").cloned(),
        })
    }

    pub fn block(&self, id: &str) -> Option<&BlockInstance> {
        self.blocks.get(id)
    }

    /// Top-level block ids in deterministic editor order: by workspace
    /// position, then id.
    pub fn root_ids(&self) -> Vec<String> {
        let mut roots: Vec<&BlockInstance> =
            self.blocks.values().filter(|b| b.top_level).collect();
        roots.sort_by(|a, b| (a.y, a.x, &a.id).cmp(&(b.y, b.x, &b.id)));
        roots.into_iter().map(|b| b.id.clone()).collect()
    }

    pub fn variable(&self, id: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.id == id)
    }

    /// Assigns every variable a Python identifier derived from its display
    /// name, disambiguating collisions in declaration order.
    pub fn python_names(&self) -> BTreeMap<String, String> {
        let mut taken = std::collections::HashSet::new();
        let mut names = BTreeMap::new();
        for var in &self.variables {
            let mut base = sanitize_identifier(&var.name);
            if base.is_empty() {
                base = "var".to_string();
            }
            let mut candidate = base.clone();
            let mut suffix = 2usize;
            while !taken.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            names.insert(var.id.clone(), candidate);
        }
        names
    }
}

fn parse_block(id: &str, raw: &Value) -> Result<BlockInstance> {
    let obj = raw
        .as_object()
        .ok_or_else(|| anyhow!("Block '{}' must be a JSON object.", id))?;
    let kind = obj
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Block '{}' missing 'kind'.", id))?
        .to_string();

    let mut fields = BTreeMap::new();
    if let Some(map) = obj.get("fields").and_then(Value::as_object) {
        for (name, value) in map {
            fields.insert(name.clone(), value.clone());
        }
    }

    let mut inputs = BTreeMap::new();
    if let Some(map) = obj.get("inputs").and_then(Value::as_object) {
        for (name, value) in map {
            if let Some(child) = value.as_str() {
                inputs.insert(name.clone(), child.to_string());
            }
        }
    }

    let mut statements = BTreeMap::new();
    if let Some(map) = obj.get("statements").and_then(Value::as_object) {
        for (name, value) in map {
            if let Some(child) = value.as_str() {
                statements.insert(name.clone(), child.to_string());
            }
        }
    }

    Ok(BlockInstance {
        id: id.to_string(),
        kind,
        top_level: obj
            .get("topLevel")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        x: obj.get("x").and_then(Value::as_i64).unwrap_or(i64::MAX),
        y: obj.get("y").and_then(Value::as_i64).unwrap_or(i64::MAX),
        fields,
        inputs,
        statements,
        next: obj
            .get("next")
            .and_then(Value::as_str)
            .map(ToString::to_string),
    })
}

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Turns a user-chosen display name into a safe Python identifier.
pub fn sanitize_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if PYTHON_KEYWORDS.iter().any(|kw| *kw == out) {
        out.push('_');
    }
    out
}

pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitizes_display_names() {
        assert_eq!(sanitize_identifier("my list!"), "my_list");
        assert_eq!(sanitize_identifier("2nd place"), "_2nd_place");
        assert_eq!(sanitize_identifier("class"), "class_");
    }

    #[test]
    fn collisions_get_deterministic_suffixes() {
        let ws = Workspace::from_value(&json!({
            "variables": [
                {"id": "a", "name": "score"},
                {"id": "b", "name": "score!"},
                {"id": "c", "name": "score"}
            ],
            "blocks": {}
        }))
        .unwrap();
        let names = ws.python_names();
        assert_eq!(names["a"], "score");
        assert_eq!(names["b"], "score_2");
        assert_eq!(names["c"], "score_3");
    }

    #[test]
    fn roots_sort_by_position_then_id() {
        let ws = Workspace::from_value(&json!({
            "blocks": {
                "b": {"kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 20},
                "a": {"kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 10},
                "c": {"kind": "text", "topLevel": false}
            }
        }))
        .unwrap();
        assert_eq!(ws.root_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
