//! Build script rendering man pages for `mllp` and each of its subcommands.

use std::{fs, path::Path};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

fn render(cmd: Command, out_dir: &Path, file_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut page = Vec::new();
    Man::new(cmd).render(&mut page)?;
    fs::write(out_dir.join(file_name), page)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let out_dir = Path::new("target/generated-man");
    fs::create_dir_all(out_dir)?;

    let cmd = cli::Cli::command();
    for sub in cmd.get_subcommands() {
        render(sub.clone(), out_dir, &format!("mllp-{}.1", sub.get_name()))?;
    }
    render(cmd, out_dir, "mllp.1")
}
