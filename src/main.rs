use anyhow::Result;

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    muni_matrix::esp::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    muni_matrix::host::run()
}
