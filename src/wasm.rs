use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub fn compile_workspace_to_python(doc: &str) -> Result<String, JsValue> {
    let registry = crate::registry::Registry::with_builtins();
    crate::compile_document_to_python(doc, &registry)
        .map(|compiled| compiled.python)
        .map_err(|e| JsValue::from_str(&e.to_string()))
}
