// build.rs

use clap::CommandFactory;
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

#[allow(dead_code)]
mod cli {
    include!("src/cli.rs");
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/cli.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = cli::Cli::command();
    let mut buffer = Vec::new();
    Man::new(cmd.clone())
        .render(&mut buffer)
        .expect("Failed to render man page");
    let man_path = man_dir.join("strata.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    // One page per subcommand, named the way man(1) looks them up
    for sub in cmd.get_subcommands() {
        let name = format!("strata-{}", sub.get_name());
        let mut buffer = Vec::new();
        Man::new(sub.clone().name(name.clone()))
            .render(&mut buffer)
            .expect("Failed to render man page");
        fs::write(man_dir.join(format!("{}.1", name)), buffer).expect("Failed to write man page");
    }

    println!("cargo:warning=Man pages generated in {}", man_dir.display());
}
