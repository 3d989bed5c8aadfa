//! Dependency analysis of the emitted body and final program assembly.
//!
//! The scan is purely textual: every emission rule that needs a runtime
//! feature emits a recognizable marker, so a matching regex never misses a
//! real use. A user string that happens to contain a marker only pulls in an
//! unused import, which is harmless.

use crate::graph::Settings;
use crate::liststore::quote_py;
use regex::Regex;

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureUsage {
    pub random: bool,
    pub sleep: bool,
    pub datetime: bool,
    pub math: bool,
    pub storage: bool,
    pub form: bool,
    pub slash: bool,
}

impl FeatureUsage {
    pub fn scan(body: &str) -> Self {
        Self {
            random: marker(r"\brandom\.\w+\(").is_match(body),
            sleep: marker(r"\basyncio\.sleep\(").is_match(body),
            datetime: marker(r"\bdatetime\.").is_match(body),
            math: marker(r"\bmath\.\w+\(").is_match(body),
            storage: marker(r"\b(?:save_data|load_data)\(").is_match(body),
            form: marker(r"FormModal\(").is_match(body),
            slash: marker(r"@bot\.tree\.command").is_match(body),
        }
    }
}

fn marker(pattern: &str) -> Regex {
    Regex::new(pattern).expect("feature markers are fixed valid patterns")
}

/// Assembles the complete program around the emitted body: imports, client
/// boilerplate, conditional helper blocks, variable initializers, the body
/// itself, route tables, and the entry-point trailer. The token is left for
/// the user to fill in.
pub fn assemble_program(
    body: &str,
    dispatchers: &str,
    route_tables: &str,
    var_init: &str,
    settings: &Settings,
) -> String {
    let usage = FeatureUsage::scan(body);
    let mut sections: Vec<String> = Vec::new();

    let mut imports = String::from("import discord\nfrom discord.ext import commands");
    if usage.random {
        imports.push_str("\nimport random");
    }
    if usage.sleep {
        imports.push_str("\nimport asyncio");
    }
    if usage.datetime {
        imports.push_str("\nimport datetime");
    }
    if usage.math {
        imports.push_str("\nimport math");
    }
    if usage.storage {
        imports.push_str("\nimport json\nimport os");
    }
    sections.push(imports);

    sections.push(format!(
        "intents = discord.Intents.all()\nbot = commands.Bot(command_prefix={}, intents=intents)",
        quote_py(&settings.prefix)
    ));

    if usage.storage {
        sections.push(persistence_helpers().to_string());
    }
    if usage.form {
        sections.push(form_modal_class().to_string());
    }
    if !dispatchers.is_empty() {
        sections.push(dispatchers.to_string());
    }
    if usage.slash {
        sections.push(slash_sync_listener().to_string());
    }
    if !var_init.is_empty() {
        sections.push(var_init.to_string());
    }
    if !body.is_empty() {
        sections.push(body.to_string());
    }
    if !route_tables.is_empty() {
        sections.push(route_tables.to_string());
    }

    sections.push(
        "if __name__ == \"__main__\":\n    bot.run(\"YOUR_BOT_TOKEN\")".to_string(),
    );

    let mut program = sections.join("\n\n");
    program.push('\n');
    program
}

fn persistence_helpers() -> &'static str {
    r#"DATA_FILE = "bot_data.json"

def load_data(key, default=None):
    if not os.path.exists(DATA_FILE):
        return default
    with open(DATA_FILE, "r") as f:
        data = json.load(f)
    return data.get(key, default)

def save_data(key, value):
    data = {}
    if os.path.exists(DATA_FILE):
        with open(DATA_FILE, "r") as f:
            data = json.load(f)
    data[key] = value
    with open(DATA_FILE, "w") as f:
        json.dump(data, f)"#
}

fn form_modal_class() -> &'static str {
    r#"class FormModal(discord.ui.Modal):
    def __init__(self, key, title, field_labels):
        super().__init__(title=title, custom_id=key)
        for label in field_labels:
            self.add_item(discord.ui.TextInput(label=label, custom_id=label))

    async def on_submit(self, interaction):
        pass"#
}

fn slash_sync_listener() -> &'static str {
    r#"@bot.listen("on_ready")
async def _sync_slash_commands():
    await bot.tree.sync()"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_detect_each_feature() {
        let usage = FeatureUsage::scan("x = random.randint(int(1), int(6))");
        assert!(usage.random);
        assert!(!usage.sleep);

        let usage = FeatureUsage::scan("await asyncio.sleep(2)\nsave_data(str(\"k\"), 1)");
        assert!(usage.sleep);
        assert!(usage.storage);
        assert!(!usage.datetime);
    }

    #[test]
    fn unused_features_pull_no_imports() {
        let settings = Settings::default();
        let program = assemble_program("await ctx.reply(str(\"hi\"))", "", "", "", &settings);
        assert!(!program.contains("import random"));
        assert!(!program.contains("import asyncio"));
        assert!(!program.contains("def load_data"));
        assert!(program.starts_with("import discord\nfrom discord.ext import commands\n"));
        assert!(program.ends_with("    bot.run(\"YOUR_BOT_TOKEN\")\n"));
    }

    #[test]
    fn each_import_appears_once() {
        let body = "a = random.randint(int(1), int(2))\nb = random.randint(int(3), int(4))";
        let program = assemble_program(body, "", "", "", &Settings::default());
        assert_eq!(program.matches("import random").count(), 1);
    }

    #[test]
    fn sections_keep_assembly_order() {
        let settings = Settings {
            prefix: "?".to_string(),
        };
        let program = assemble_program(
            "await ctx.reply(str(x))",
            "@bot.event\nasync def on_interaction(interaction):\n    pass",
            "BUTTON_ROUTES = {}",
            "x = 0",
            &settings,
        );
        let bot_line = program.find("command_prefix=\"?\"").unwrap();
        let dispatch = program.find("on_interaction").unwrap();
        let init = program.find("x = 0").unwrap();
        let body = program.find("await ctx.reply").unwrap();
        let tables = program.find("BUTTON_ROUTES").unwrap();
        let trailer = program.find("__main__").unwrap();
        assert!(bot_line < dispatch);
        assert!(dispatch < init);
        assert!(init < body);
        assert!(body < tables);
        assert!(tables < trailer);
    }
}
