use blockbot_rs_core::compile_document_to_python;
use blockbot_rs_core::registry::Registry;
use serde_json::{json, Value};

fn compile(doc: &Value) -> blockbot_rs_core::CompiledProgram {
    let registry = Registry::with_builtins();
    compile_document_to_python(&doc.to_string(), &registry).expect("fixture compiles")
}

#[test]
fn compilation_is_deterministic() {
    let doc = json!({
        "variables": [{"id": "v1", "name": "score"}],
        "blocks": {
            "root": {
                "kind": "event_message_received", "topLevel": true, "x": 0, "y": 0,
                "statements": {"ACTIONS": "s1"}
            },
            "s1": {
                "kind": "action_reply",
                "inputs": {"MESSAGE": "t1"},
                "next": "s2"
            },
            "s2": {"kind": "data_change_variable", "fields": {"VAR": "v1"}},
            "t1": {"kind": "text", "fields": {"TEXT": "hello"}}
        }
    });
    let first = compile(&doc);
    let second = compile(&doc);
    assert_eq!(first.python, second.python);
    assert_eq!(first.body, second.body);
}

#[test]
fn empty_statement_sockets_emit_pass() {
    let doc = json!({
        "blocks": {
            "root": {"kind": "event_member_joined", "topLevel": true, "x": 0, "y": 0}
        }
    });
    let compiled = compile(&doc);
    assert!(compiled.body.ends_with("    pass"));
    assert!(compiled.body.contains("async def on_member_join_1(member):"));
}

#[test]
fn weaker_operands_are_parenthesized() {
    let doc = json!({
        "variables": [{"id": "v1", "name": "score"}],
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "calc"},
                "statements": {"ACTIONS": "set"}
            },
            "set": {
                "kind": "data_set_variable",
                "fields": {"VAR": "v1"},
                "inputs": {"VALUE": "mul"}
            },
            "mul": {
                "kind": "math_arithmetic",
                "fields": {"OP": "multiply"},
                "inputs": {"A": "add", "B": "three"}
            },
            "add": {
                "kind": "math_arithmetic",
                "fields": {"OP": "add"},
                "inputs": {"A": "one", "B": "two"}
            },
            "one": {"kind": "number", "fields": {"NUM": 1}},
            "two": {"kind": "number", "fields": {"NUM": 2}},
            "three": {"kind": "number", "fields": {"NUM": 3}}
        }
    });
    let compiled = compile(&doc);
    assert!(compiled.body.contains("score = (1 + 2) * 3"));
}

#[test]
fn equal_tier_operands_take_no_redundant_parens() {
    let doc = json!({
        "variables": [{"id": "v1", "name": "score"}],
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "calc"},
                "statements": {"ACTIONS": "set"}
            },
            "set": {
                "kind": "data_set_variable",
                "fields": {"VAR": "v1"},
                "inputs": {"VALUE": "outer"}
            },
            "outer": {
                "kind": "math_arithmetic",
                "fields": {"OP": "add"},
                "inputs": {"A": "inner", "B": "three"}
            },
            "inner": {
                "kind": "math_arithmetic",
                "fields": {"OP": "add"},
                "inputs": {"A": "one", "B": "two"}
            },
            "one": {"kind": "number", "fields": {"NUM": 1}},
            "two": {"kind": "number", "fields": {"NUM": 2}},
            "three": {"kind": "number", "fields": {"NUM": 3}}
        }
    });
    let compiled = compile(&doc);
    assert!(compiled.body.contains("score = 1 + 2 + 3"));
}

#[test]
fn power_bases_are_parenthesized() {
    let doc = json!({
        "variables": [{"id": "v1", "name": "out"}],
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "calc"},
                "statements": {"ACTIONS": "set_a"}
            },
            "set_a": {
                "kind": "data_set_variable",
                "fields": {"VAR": "v1"},
                "inputs": {"VALUE": "neg_pow"},
                "next": "set_b"
            },
            "set_b": {
                "kind": "data_set_variable",
                "fields": {"VAR": "v1"},
                "inputs": {"VALUE": "outer_pow"}
            },
            "neg_pow": {
                "kind": "math_arithmetic",
                "fields": {"OP": "power"},
                "inputs": {"A": "neg_two", "B": "two"}
            },
            "outer_pow": {
                "kind": "math_arithmetic",
                "fields": {"OP": "power"},
                "inputs": {"A": "inner_pow", "B": "two"}
            },
            "inner_pow": {
                "kind": "math_arithmetic",
                "fields": {"OP": "power"},
                "inputs": {"A": "two", "B": "three"}
            },
            "neg_two": {"kind": "number", "fields": {"NUM": -2}},
            "two": {"kind": "number", "fields": {"NUM": 2}},
            "three": {"kind": "number", "fields": {"NUM": 3}}
        }
    });
    let compiled = compile(&doc);
    // ** binds tighter than unary minus and associates right; an unwrapped
    // base would change the value.
    assert!(compiled.body.contains("out = (-2) ** 2"));
    assert!(compiled.body.contains("out = (2 ** 3) ** 2"));
}

#[test]
fn duplicate_command_names_reregister_the_later_handler() {
    let doc = json!({
        "blocks": {
            "early": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "hi"},
                "statements": {"ACTIONS": "say_a"}
            },
            "say_a": {"kind": "action_reply", "inputs": {"MESSAGE": "t_a"}},
            "t_a": {"kind": "text", "fields": {"TEXT": "first"}},
            "late": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 50,
                "fields": {"NAME": "hi"},
                "statements": {"ACTIONS": "say_b"}
            },
            "say_b": {"kind": "action_reply", "inputs": {"MESSAGE": "t_b"}},
            "t_b": {"kind": "text", "fields": {"TEXT": "second"}}
        }
    });
    let compiled = compile(&doc);
    let first_def = compiled.body.find("async def command_hi_1(ctx):").unwrap();
    let second_def = compiled.body.find("async def command_hi_2(ctx):").unwrap();
    assert!(first_def < second_def);
    // The later definition unregisters the earlier command before taking
    // over its name.
    assert_eq!(compiled.body.matches("bot.remove_command(\"hi\")").count(), 1);
    let remove = compiled.body.find("bot.remove_command(\"hi\")").unwrap();
    assert!(first_def < remove);
    assert!(remove < second_def);
    assert!(compiled
        .warnings
        .iter()
        .any(|w| w.contains("Duplicate command name 'hi'")));
}

#[test]
fn branch_numbering_gaps_keep_later_branches() {
    let doc = json!({
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "pick"},
                "statements": {"ACTIONS": "cond"}
            },
            "cond": {
                "kind": "control_if",
                "inputs": {"IF0": "yes", "IF2": "no"},
                "statements": {"DO0": "say_a", "DO2": "say_b"}
            },
            "yes": {"kind": "boolean", "fields": {"BOOL": true}},
            "no": {"kind": "boolean", "fields": {"BOOL": false}},
            "say_a": {"kind": "action_reply", "inputs": {"MESSAGE": "t_a"}},
            "t_a": {"kind": "text", "fields": {"TEXT": "first"}},
            "say_b": {"kind": "action_reply", "inputs": {"MESSAGE": "t_b"}},
            "t_b": {"kind": "text", "fields": {"TEXT": "second"}}
        }
    });
    let compiled = compile(&doc);
    assert!(compiled.body.contains("if True:"));
    assert!(compiled.body.contains("elif False:"));
    assert!(compiled.body.contains("await ctx.reply(str(\"second\"))"));
}

#[test]
fn message_content_reads_safely_in_prefix_commands() {
    let doc = json!({
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "echo"},
                "statements": {"ACTIONS": "say"}
            },
            "say": {"kind": "action_reply", "inputs": {"MESSAGE": "content"}},
            "content": {"kind": "ctx_message_content"}
        }
    });
    let compiled = compile(&doc);
    // The prefix-command context is rebound to the triggering message so the
    // content read resolves; getattr covers contexts with no message text.
    assert!(compiled.body.contains("ctx = ctx.message"));
    assert!(compiled
        .body
        .contains("(getattr(ctx, \"content\", \"\") if ctx is not None else \"\")"));
}

#[test]
fn replace_operands_are_parenthesized_before_coercion() {
    let doc = json!({
        "variables": [{"id": "v1", "name": "out"}],
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "fix"},
                "statements": {"ACTIONS": "set"}
            },
            "set": {
                "kind": "data_set_variable",
                "fields": {"VAR": "v1"},
                "inputs": {"VALUE": "rep"}
            },
            "rep": {
                "kind": "text_replace",
                "inputs": {"TEXT": "t", "FROM": "sum", "TO": "empty"}
            },
            "t": {"kind": "text", "fields": {"TEXT": "12"}},
            "sum": {
                "kind": "math_arithmetic",
                "fields": {"OP": "add"},
                "inputs": {"A": "one", "B": "two"}
            },
            "empty": {"kind": "text", "fields": {"TEXT": ""}},
            "one": {"kind": "number", "fields": {"NUM": 1}},
            "two": {"kind": "number", "fields": {"NUM": 2}}
        }
    });
    let compiled = compile(&doc);
    assert!(compiled
        .body
        .contains("out = str(\"12\").replace(str((1 + 2)), str(\"\"))"));
}

#[test]
fn ui_positions_convert_to_python_indexing() {
    let doc = json!({
        "variables": [
            {"id": "l1", "name": "todo", "kind": "list"},
            {"id": "v1", "name": "picked"}
        ],
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "peek"},
                "statements": {"ACTIONS": "set_a"}
            },
            "set_a": {
                "kind": "data_set_variable",
                "fields": {"VAR": "v1"},
                "inputs": {"VALUE": "get_second"},
                "next": "set_b"
            },
            "set_b": {
                "kind": "data_set_variable",
                "fields": {"VAR": "v1"},
                "inputs": {"VALUE": "get_last"}
            },
            "get_second": {
                "kind": "list_get",
                "fields": {"VAR": "l1", "WHERE": "from_start"},
                "inputs": {"INDEX": "two"}
            },
            "get_last": {
                "kind": "list_get",
                "fields": {"VAR": "l1", "WHERE": "from_end"},
                "inputs": {"INDEX": "one"}
            },
            "one": {"kind": "number", "fields": {"NUM": 1}},
            "two": {"kind": "number", "fields": {"NUM": 2}}
        }
    });
    let compiled = compile(&doc);
    assert!(compiled.body.contains("picked = todo[1]"));
    assert!(compiled.body.contains("picked = todo[-1]"));
}

#[test]
fn colliding_button_keys_keep_the_last_handler() {
    let doc = json!({
        "blocks": {
            "early": {
                "kind": "event_button_clicked", "topLevel": true, "x": 0, "y": 0,
                "fields": {"KEY": "go"}
            },
            "late": {
                "kind": "event_button_clicked", "topLevel": true, "x": 0, "y": 50,
                "fields": {"KEY": "go"}
            }
        }
    });
    let compiled = compile(&doc);
    let table_start = compiled.python.find("BUTTON_ROUTES = {").unwrap();
    let table = &compiled.python[table_start..];
    let table_end = table.find('}').unwrap();
    let table = &table[..table_end];
    assert_eq!(table.matches("\"go\":").count(), 1);
    // Both handlers still exist; the table points at the later one.
    let first_handler = compiled.body.find("async def button_go_").unwrap();
    let second_handler = compiled.body.rfind("async def button_go_").unwrap();
    assert!(second_handler > first_handler);
    let name_end = compiled.body[second_handler..].find('(').unwrap();
    let later_name = &compiled.body[second_handler + "async def ".len()..second_handler + name_end];
    assert!(table.contains(later_name));
    assert!(compiled
        .warnings
        .iter()
        .any(|w| w.contains("Duplicate button key 'go'")));
}

#[test]
fn imports_are_gated_on_feature_markers() {
    let without = json!({
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "hi"},
                "statements": {"ACTIONS": "say"}
            },
            "say": {"kind": "action_reply", "inputs": {"MESSAGE": "t"}},
            "t": {"kind": "text", "fields": {"TEXT": "hello"}}
        }
    });
    let compiled = compile(&without);
    assert!(!compiled.python.contains("import random"));

    let with = json!({
        "variables": [{"id": "v1", "name": "roll"}],
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "roll"},
                "statements": {"ACTIONS": "set_a"}
            },
            "set_a": {
                "kind": "data_set_variable",
                "fields": {"VAR": "v1"},
                "inputs": {"VALUE": "r1"},
                "next": "set_b"
            },
            "set_b": {
                "kind": "data_set_variable",
                "fields": {"VAR": "v1"},
                "inputs": {"VALUE": "r2"}
            },
            "r1": {"kind": "math_random"},
            "r2": {"kind": "math_random"}
        }
    });
    let compiled = compile(&with);
    assert_eq!(compiled.python.matches("import random").count(), 1);
}

#[test]
fn list_initializers_use_narrowest_literals() {
    let doc = json!({
        "variables": [{"id": "l1", "name": "todo", "kind": "list"}],
        "blocks": {},
        "lists": [{"id": "l1", "items": ["1", "true", "hello"]}]
    });
    let compiled = compile(&doc);
    assert!(compiled.python.contains("todo = [1, True, \"hello\"]"));
}

#[test]
fn context_expressions_are_guarded_in_handlers_and_neutral_in_procedures() {
    let doc = json!({
        "blocks": {
            "proc": {
                "kind": "define_procedure", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "greet"},
                "statements": {"BODY": "p_say"}
            },
            "p_say": {"kind": "action_reply", "inputs": {"MESSAGE": "p_name"}},
            "p_name": {"kind": "ctx_user_name"},
            "root": {
                "kind": "event_message_received", "topLevel": true, "x": 0, "y": 50,
                "statements": {"ACTIONS": "h_say"}
            },
            "h_say": {"kind": "action_reply", "inputs": {"MESSAGE": "h_name"}},
            "h_name": {"kind": "ctx_user_name"}
        }
    });
    let compiled = compile(&doc);
    let (proc_part, handler_part) = compiled
        .body
        .split_once("async def on_message_")
        .expect("both scripts emitted");
    assert!(proc_part.contains("await ctx.reply(str(\"Unknown\"))"));
    assert!(handler_part.contains("(user.name if user is not None else \"Unknown\")"));
}

#[test]
fn unknown_kinds_abort_with_the_kind_name() {
    let doc = json!({
        "blocks": {
            "root": {
                "kind": "event_message_received", "topLevel": true, "x": 0, "y": 0,
                "statements": {"ACTIONS": "mystery"}
            },
            "mystery": {"kind": "plugin_fireworks"}
        }
    });
    let registry = Registry::with_builtins();
    let err = compile_document_to_python(&doc.to_string(), &registry).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("plugin_fireworks"));
    assert!(message.contains("'mystery'"));
    assert!(message.contains("plugin"));
}

#[test]
fn embeds_hoist_construction_before_the_send() {
    let doc = json!({
        "blocks": {
            "root": {
                "kind": "event_prefix_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "info"},
                "statements": {"ACTIONS": "send"}
            },
            "send": {"kind": "action_send_embed", "inputs": {"EMBED": "embed"}},
            "embed": {
                "kind": "embed_create",
                "statements": {"PROPERTIES": "title"}
            },
            "title": {
                "kind": "embed_set_title",
                "inputs": {"TEXT": "t"},
                "next": "color"
            },
            "color": {"kind": "embed_set_color", "fields": {"COLOR": "#ff0000"}},
            "t": {"kind": "text", "fields": {"TEXT": "Server info"}}
        }
    });
    let compiled = compile(&doc);
    let create = compiled.body.find("= discord.Embed()").unwrap();
    let title = compiled.body.find(".title = str(\"Server info\")").unwrap();
    let color = compiled.body.find(".color = discord.Color(0xFF0000)").unwrap();
    let send = compiled.body.find("await ctx.channel.send(embed=").unwrap();
    assert!(create < title);
    assert!(title < color);
    assert!(color < send);
}

#[test]
fn slash_commands_pull_the_sync_listener() {
    let doc = json!({
        "blocks": {
            "root": {
                "kind": "event_slash_command", "topLevel": true, "x": 0, "y": 0,
                "fields": {"NAME": "ping", "DESCRIPTION": "Ping the bot"}
            }
        }
    });
    let compiled = compile(&doc);
    assert!(compiled
        .python
        .contains("@bot.tree.command(name=\"ping\", description=\"Ping the bot\")"));
    assert!(compiled.python.contains("await bot.tree.sync()"));
}
