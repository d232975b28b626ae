//! labflow CLI binary. All logic lives in the library; `cli::run()` prints
//! everything, including errors.

fn main() {
    if let Err(code) = labflow::cli::run() {
        std::process::exit(code.as_i32());
    }
}
