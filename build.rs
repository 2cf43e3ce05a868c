fn main() {
    // ── macOS: link Info.plist into the binary for CoreBluetooth ─────────────
    //
    // CoreBluetooth keeps a CLI tool unauthorised, and scans return nothing,
    // unless the executable carries NSBluetoothAlwaysUsageDescription. A
    // plain binary has no bundle, so the plist goes into the
    //   __TEXT,__info_plist
    // Mach-O section where the OS looks for it.
    //
    // CARGO_CFG_TARGET_OS is the target, so cross builds get the section too.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }

    let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        println!("cargo:warning=CARGO_MANIFEST_DIR unset; Info.plist not embedded");
        return;
    };
    let plist = format!("{dir}/Info.plist");

    for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
        println!("cargo:rustc-link-arg={arg}");
    }
    println!("cargo:rerun-if-changed=Info.plist");
}
