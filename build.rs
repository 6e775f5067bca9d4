use std::process::Command;

fn main() {
    if let Ok(output) = Command::new("git").args(&["describe", "--tags"]).output() {
        if output.status.success() {
            if let Ok(version) = String::from_utf8(output.stdout) {
                println!(
                    "cargo:rustc-env=BLESTRIP_VERSION_ID=blestrip {}",
                    version.trim()
                );
            }
        }
    }
}
