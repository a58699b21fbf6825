use std::process::Command;

// The server refuses to boot without a signing secret; everything else has a
// workable default.
#[test]
fn fails_without_jwt_secret() {
    let exe = env!("CARGO_BIN_EXE_deskly-admin");
    let output = Command::new(exe)
        .env_remove("JWT_SECRET")
        .output()
        .expect("failed to run deskly-admin binary");
    assert!(!output.status.success());
}
