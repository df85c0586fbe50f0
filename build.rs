extern crate cbindgen;

use std::env;

use cbindgen::{Config, Language};

const HEADER: &str = "#pragma once

#ifdef __clang__
#define NONNULL _Nonnull
#else
#define NONNULL
#endif
";

const TRAILER: &str = "
#undef NONNULL
";

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let mut config = Config::default();
    config.header = Some(HEADER.to_owned());
    config.trailer = Some(TRAILER.to_owned());
    config.namespace = Some("localm".to_owned());
    config.language = Language::C;
    config.cpp_compat = true;
    config.usize_is_size_t = true;
    config.style = cbindgen::Style::Tag;
    config.pointer.non_null_attribute = Some("NONNULL".to_owned());
    config.enumeration.prefix_with_name = true;
    cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_config(config)
        .generate()
        .expect("Unable to generate bindings")
        .write_to_file("include/localm/localm.h");
}
