fn main() {
    vergen::EmitBuilder::builder()
        .build_timestamp()
        .git_sha(false)
        .git_commit_timestamp()
        .rustc_semver()
        .cargo_target_triple()
        .emit()
        .unwrap();
}
