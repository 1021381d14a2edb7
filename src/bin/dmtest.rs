// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{env, process};

use dmtask::{DmConfig, DmContext, DmResult};

fn run(names: &[String]) -> DmResult<()> {
    let ctx = DmContext::open(&DmConfig::default())?;

    println!("library version: {}", ctx.get_library_version()?);
    println!("driver version: {}", ctx.get_driver_version()?);

    println!("devices:");
    for (name, device) in ctx.list_devices()? {
        println!("  {name} ({device})");
    }

    for name in names {
        let info = ctx.get_info_with_deferred(name)?;
        println!("{name}: {info:?}");
        if info.exists() {
            for entry in ctx.table_entries(name)? {
                println!(
                    "  {} {} {} {}",
                    entry.start, entry.length, entry.target_type, entry.params
                );
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let names: Vec<String> = env::args().skip(1).collect();
    if let Err(err) = run(&names) {
        eprintln!("dmtest: {err}");
        process::exit(1);
    }
}
