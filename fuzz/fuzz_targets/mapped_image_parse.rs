#![no_main]
use libfuzzer_sys::fuzz_target;
use pemap::{ImportKind, MappedImage};

fuzz_target!(|data: &[u8]| {
    let Ok(image) = MappedImage::new(data) else {
        return;
    };

    for section in image.sections().iter() {
        let _ = image.rva_to_range(section.virtual_address(), 1);
    }
    let _ = image.data_directories().count();

    if let Ok(exports) = image.exports() {
        let _ = exports.dll_name();
        for entry in exports.entries().flatten() {
            let _ = exports.function(&entry);
            if let Some(name) = entry.name.and_then(|n| n.to_str().ok()) {
                let _ = exports.lookup_by_name(name);
            }
        }
    }

    for kind in [ImportKind::Eager, ImportKind::Delay] {
        if let Ok(imports) = image.imports(kind) {
            for dll in imports.dlls().flatten() {
                let _ = dll.iat_rva();
                for entry in dll.entries() {
                    let _ = entry;
                }
            }
        }
    }
    let _ = image.import_hash();
    let _ = image.relocations();
    let _ = image.checksum_valid();
});
