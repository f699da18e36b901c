/*
 * Copyright 2019-2021 Wren Powell
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::path::PathBuf;
use std::process;

use clap::Parser;

use rockup::{CompressionPolicy, Project, ProjectConfig, VolumePolicy};

/// Incremental file backup.
#[derive(Parser, Debug)]
#[command(name = "rockup", version, about)]
struct Cli {
    /// The backup repository directory.
    backup_dir: PathBuf,

    /// The source directories to back up.
    #[arg(required_unless_present = "restore")]
    sources: Vec<PathBuf>,

    /// Run a backup (the default).
    #[arg(short = 'b', long, conflicts_with = "restore")]
    backup: bool,

    /// Force a full backup, ignoring any previous snapshot.
    #[arg(short = 'B', long, conflicts_with = "restore")]
    full: bool,

    /// Restore the latest snapshot into the given directory.
    #[arg(short = 'r', long, value_name = "DEST")]
    restore: Option<PathBuf>,

    /// Plan without touching the filesystem.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// The volume-type policy: auto, copy, or cat.
    #[arg(short = 't', long, value_name = "POLICY", default_value = "auto")]
    volume_type: VolumePolicy,

    /// The compression policy: auto, enforce, or disable.
    #[arg(short = 'z', long, value_name = "POLICY", default_value = "auto")]
    compression: CompressionPolicy,

    /// Obfuscate stream names in copy volumes.
    #[arg(long)]
    obfuscate: bool,
}

fn run(cli: &Cli) -> rockup::Result<()> {
    let config = ProjectConfig {
        volume_policy: cli.volume_type,
        compression_policy: cli.compression,
        obfuscate: cli.obfuscate,
        dry_run: cli.dry_run,
    };
    let mut project = Project::open(&cli.backup_dir, config)?;

    match &cli.restore {
        Some(destination) => {
            let manifest_id = project.restore(destination)?;
            println!("restored snapshot {}", manifest_id);
        }
        None => {
            let manifest_id = project.backup(&cli.sources, cli.full)?;
            println!("created snapshot {}", manifest_id);
        }
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(error) = run(&cli) {
        eprintln!("rockup: {}", error);
        process::exit(1);
    }
}
