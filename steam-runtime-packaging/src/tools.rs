// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! External programs: `dpkg-deb` and `readelf`. */

use {
    crate::error::{Result, RuntimeError},
    duct::cmd,
    once_cell::sync::Lazy,
    regex::Regex,
    std::{ffi::OsString, path::Path},
};

static RE_BUILD_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Build ID: (?P<id>[0-9a-fA-F]{3,})").expect("build id regex should compile")
});

fn run(program: &str, args: Vec<OsString>) -> Result<Vec<u8>> {
    let output = cmd(program, &args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .map_err(|e| RuntimeError::CommandFailed(program.to_string(), format!("{}", e)))?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(RuntimeError::CommandFailed(
            format!("{} {:?}", program, args),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

/// List the files of a `.deb` with `dpkg-deb -c`.
pub fn dpkg_deb_contents(deb: &Path) -> Result<Vec<u8>> {
    run("dpkg-deb", vec!["-c".into(), deb.into()])
}

/// Unpack the files of a `.deb` into a directory with `dpkg-deb -x`.
pub fn dpkg_deb_extract(deb: &Path, dest_dir: &Path) -> Result<()> {
    run("dpkg-deb", vec!["-x".into(), deb.into(), dest_dir.into()])?;

    Ok(())
}

/// Extract the GNU build ID from `readelf -n` output.
pub fn parse_build_id(readelf_notes: &str) -> Option<String> {
    RE_BUILD_ID
        .captures(readelf_notes)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str().to_lowercase())
}

/// Obtain the GNU build ID of an ELF file.
///
/// Files that `readelf` cannot parse have no build ID.
pub fn elf_build_id(path: &Path) -> Result<Option<String>> {
    match run("readelf", vec!["-n".into(), path.into()]) {
        Ok(stdout) => Ok(parse_build_id(&String::from_utf8_lossy(&stdout))),
        Err(RuntimeError::CommandFailed(_, _)) => Ok(None),
        Err(e) => Err(e),
    }
}
