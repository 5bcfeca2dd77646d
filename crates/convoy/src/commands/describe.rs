use convoy_core::Registry;

pub fn handle_pipeline(name: &str) -> anyhow::Result<()> {
    let registry = Registry::builtin()?;
    let pipeline = registry.get(name)?;
    print!("{}", pipeline.docs);
    if !pipeline.docs.ends_with('\n') {
        println!();
    }
    Ok(())
}
