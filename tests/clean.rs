//! Cleaning with the build directory given as `.`, the way the command line
//! defaults it.  Changes the working directory, hence a test binary of its own.

use kiln::{Flags, Ledger, Options, Plain, Scheduler};
use std::path::Path;

#[test]
fn clean_relative_to_cwd() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let prev = std::env::current_dir()?;
    std::env::set_current_dir(dir.path())?;
    let result = clean_in_cwd();
    std::env::set_current_dir(prev)?;
    result
}

fn clean_in_cwd() -> anyhow::Result<()> {
    std::fs::create_dir_all("src")?;
    std::fs::write("src/a.c", "")?;

    let touch = kiln::Action::callback("touch", |call| {
        for path in call.target_paths() {
            std::fs::write(&path, "").map_err(anyhow::Error::from)?;
        }
        Ok(true)
    });
    let sched = Scheduler::new(Options::default());
    sched.init(Some(Ledger::open(".", "")?), false, false);
    let src = sched.define(Plain::new("src/a.c"), Flags::empty());
    let obj = sched.define(Plain::new("out/sub/a.o"), Flags::empty());
    let lib = sched.define(Plain::new("out/liba.a"), Flags::empty());
    sched.rule(&touch, &[obj], &[src])?;
    sched.rule(&touch, &[lib], &[obj])?;
    assert!(sched.update(&[lib])?);
    assert!(Path::new("out/sub/a.o").exists());

    assert_eq!(sched.clean(1)?, 2);
    assert!(!Path::new("out").exists());
    assert!(Path::new("src/a.c").exists());
    assert!(Path::new(".kiln/files").exists());
    Ok(())
}
