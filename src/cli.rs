use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "blockbot-rs",
    about = "Compiles a visual block workspace into a runnable discord.py bot program."
)]
pub struct Args {
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    #[arg(value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    #[arg(
        long,
        help = "Write the raw emitted body (before imports and boilerplate) to this path."
    )]
    pub emit_body: Option<PathBuf>,

    #[arg(long, help = "Run `python -m py_compile` on the generated program.")]
    pub check: bool,

    #[arg(long, help = "Override the command prefix from the workspace settings.")]
    pub prefix: Option<String>,

    #[arg(long, help = "List the registered block kinds and exit.")]
    pub list_kinds: bool,
}
