use crate::graph::Workspace;
use serde_json::{json, Value};

/// Authoritative ordered contents of every list-type variable, independent of
/// the block graph. Keys are the variable table's stable identifiers; the
/// store's identifier space is kept a subset of the live variable table.
#[derive(Debug, Clone, Default)]
pub struct ListStore {
    entries: Vec<ListEntry>,
}

#[derive(Debug, Clone)]
struct ListEntry {
    id: String,
    items: Vec<String>,
}

impl ListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads list contents from the workspace's persisted list document.
    ///
    /// Two shapes are accepted: the current array-of-entries shape
    /// (`[{"id": ..., "items": [...]}]`) and the legacy flat map from a
    /// display name to a sequence, resolved against the live variable table.
    /// Entries that no longer have a live list variable are dropped and
    /// reported through `warnings`.
    pub fn from_workspace(ws: &Workspace, warnings: &mut Vec<String>) -> Self {
        let mut store = Self::new();
        let Some(doc) = &ws.lists_document else {
            return store;
        };

        match doc {
            Value::Array(entries) => {
                for entry in entries {
                    let Some(id) = entry.get("id").and_then(Value::as_str) else {
                        continue;
                    };
                    if ws.variable(id).map(|v| v.is_list) != Some(true) {
                        warnings.push(format!(
                            "Dropped persisted list '{}': no matching list variable.",
                            id
                        ));
                        continue;
                    }
                    let items = entry
                        .get("items")
                        .and_then(Value::as_array)
                        .map(|arr| arr.iter().map(item_as_string).collect())
                        .unwrap_or_default();
                    store.entries.push(ListEntry {
                        id: id.to_string(),
                        items,
                    });
                }
            }
            // Legacy shape: flat name -> sequence, without identifier linkage.
            Value::Object(map) => {
                for (name, raw_items) in map {
                    let resolved = ws
                        .variables
                        .iter()
                        .find(|v| v.is_list && v.name == *name)
                        .map(|v| v.id.clone());
                    let Some(id) = resolved else {
                        warnings.push(format!(
                            "Dropped legacy list entry '{}': no matching list variable.",
                            name
                        ));
                        continue;
                    };
                    let items = raw_items
                        .as_array()
                        .map(|arr| arr.iter().map(item_as_string).collect())
                        .unwrap_or_default();
                    store.entries.push(ListEntry { id, items });
                }
            }
            _ => {}
        }
        store
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .map(|e| json!({ "id": e.id, "items": e.items }))
                .collect(),
        )
    }

    pub fn items(&self, id: &str) -> &[String] {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.items.as_slice())
            .unwrap_or(&[])
    }

    pub fn append(&mut self, id: &str, value: impl Into<String>) {
        self.entry_mut(id).items.push(value.into());
    }

    pub fn update(&mut self, id: &str, index: usize, value: impl Into<String>) {
        let entry = self.entry_mut(id);
        if index < entry.items.len() {
            entry.items[index] = value.into();
        }
    }

    pub fn remove(&mut self, id: &str, index: usize) {
        let entry = self.entry_mut(id);
        if index < entry.items.len() {
            entry.items.remove(index);
        }
    }

    pub fn clear(&mut self, id: &str) {
        self.entry_mut(id).items.clear();
    }

    pub fn delete_variable(&mut self, id: &str) {
        self.entries.retain(|e| e.id != id);
    }

    fn entry_mut(&mut self, id: &str) -> &mut ListEntry {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            return &mut self.entries[pos];
        }
        self.entries.push(ListEntry {
            id: id.to_string(),
            items: Vec::new(),
        });
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// One initializer statement per variable in table order: list variables
    /// get their stored sequence as a literal, scalar variables their table
    /// default (or `0`). Each element is coerced to the narrowest Python
    /// literal form.
    pub fn emit_initializers(&self, ws: &Workspace) -> String {
        let names = ws.python_names();
        let mut lines = Vec::new();
        for var in &ws.variables {
            let Some(py_name) = names.get(&var.id) else {
                continue;
            };
            if var.is_list {
                let rendered: Vec<String> = self
                    .items(&var.id)
                    .iter()
                    .map(|item| python_literal(item))
                    .collect();
                lines.push(format!("{} = [{}]", py_name, rendered.join(", ")));
            } else {
                let initial = var.initial.as_deref().unwrap_or("0");
                lines.push(format!("{} = {}", py_name, python_literal(initial)));
            }
        }
        lines.join("\n")
    }
}

fn item_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Coerces a stored scalar string to the narrowest Python literal: integer,
/// float, boolean, `None`, else a quoted string.
pub fn python_literal(raw: &str) -> String {
    if let Ok(n) = raw.parse::<i64>() {
        return n.to_string();
    }
    if is_plain_float(raw) {
        return raw.to_string();
    }
    if raw.eq_ignore_ascii_case("true") {
        return "True".to_string();
    }
    if raw.eq_ignore_ascii_case("false") {
        return "False".to_string();
    }
    if raw.eq_ignore_ascii_case("null") || raw.eq_ignore_ascii_case("none") {
        return "None".to_string();
    }
    quote_py(raw)
}

fn is_plain_float(raw: &str) -> bool {
    let body = raw.strip_prefix('-').unwrap_or(raw);
    let Some((int_part, frac_part)) = body.split_once('.') else {
        return false;
    };
    !int_part.is_empty()
        && !frac_part.is_empty()
        && int_part.chars().all(|c| c.is_ascii_digit())
        && frac_part.chars().all(|c| c.is_ascii_digit())
        && raw.parse::<f64>().is_ok()
}

/// Quotes a string as a Python double-quoted literal.
pub fn quote_py(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Workspace;
    use serde_json::json;

    fn workspace_with_lists(lists: Value) -> Workspace {
        Workspace::from_value(&json!({
            "variables": [
                {"id": "v1", "name": "todo", "kind": "list"},
                {"id": "v2", "name": "score"}
            ],
            "blocks": {},
            "lists": lists
        }))
        .unwrap()
    }

    #[test]
    fn coerces_narrowest_literals() {
        assert_eq!(python_literal("1"), "1");
        assert_eq!(python_literal("-12"), "-12");
        assert_eq!(python_literal("1.50"), "1.50");
        assert_eq!(python_literal("true"), "True");
        assert_eq!(python_literal("False"), "False");
        assert_eq!(python_literal("null"), "None");
        assert_eq!(python_literal("hello"), "\"hello\"");
        assert_eq!(python_literal("1.2.3"), "\"1.2.3\"");
    }

    #[test]
    fn initializers_round_trip_through_persistence() {
        let ws = workspace_with_lists(json!([
            {"id": "v1", "items": ["1", "true", "hello"]}
        ]));
        let mut warnings = Vec::new();
        let store = ListStore::from_workspace(&ws, &mut warnings);
        assert!(warnings.is_empty());

        let persisted = store.to_json();
        let ws2 = workspace_with_lists(persisted);
        let store2 = ListStore::from_workspace(&ws2, &mut warnings);
        assert_eq!(
            store2.emit_initializers(&ws2),
            "todo = [1, True, \"hello\"]\nscore = 0"
        );
    }

    #[test]
    fn legacy_flat_shape_resolves_against_variable_table() {
        let ws = workspace_with_lists(json!({
            "todo": ["a", "2"],
            "gone": ["x"]
        }));
        let mut warnings = Vec::new();
        let store = ListStore::from_workspace(&ws, &mut warnings);
        assert_eq!(store.items("v1"), ["a".to_string(), "2".to_string()]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'gone'"));
    }

    #[test]
    fn entries_without_live_variables_are_pruned() {
        let ws = workspace_with_lists(json!([
            {"id": "v1", "items": []},
            {"id": "deleted", "items": ["1"]}
        ]));
        let mut warnings = Vec::new();
        let store = ListStore::from_workspace(&ws, &mut warnings);
        assert!(store.items("deleted").is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn mutations_materialize_lazily() {
        let mut store = ListStore::new();
        store.append("v1", "a");
        store.append("v1", "b");
        store.update("v1", 1, "c");
        store.remove("v1", 0);
        assert_eq!(store.items("v1"), ["c".to_string()]);
        store.clear("v1");
        assert!(store.items("v1").is_empty());
    }
}
