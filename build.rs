use std::{env::var, fmt::Write as FmtWrite, fs, path::PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(var("OUT_DIR")?);
    let families = [
        ("gen12lp", "Gen12Lp"),
        ("xe_hpc_core", "XeHpcCore"),
        ("xe3p_core", "Xe3pCore"),
    ];
    let simds = [1u32, 8, 16, 32];
    let mut round_trip_tests = String::new();
    for (name, family) in families {
        for simd in simds {
            writeln!(
                &mut round_trip_tests,
                "impl_round_trip_test!({name}, {family}, {simd});"
            )?;
        }
    }
    let implicit_args_dir = out_dir.join("implicit_args");
    fs::create_dir_all(&implicit_args_dir)?;
    fs::write(
        implicit_args_dir.join("implicit_args_round_trip_tests.in"),
        round_trip_tests,
    )?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
