use minijinja::{Environment, context};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
struct TypeInfo {
    name: String,
    code: i32,
    size: usize,
    label: String,
    #[serde(default)]
    rust: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct TypeList {
    types: Vec<TypeInfo>,
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));

    // Read the yaml file
    let yaml_path = manifest_dir.join("../supported_types.yaml");
    let yaml_str = fs::read_to_string(&yaml_path)
        .expect("Unable to read supported_types.yaml");
    let type_list: TypeList = serde_yaml::from_str(&yaml_str)
        .expect("Failed to parse YAML");

    // Load the template from a file
    let template_path = manifest_dir.join("templates/data_types.jinja");
    let template_source = fs::read_to_string(&template_path)
        .expect("Unable to read template file");

    let jinja = Environment::new();
    let tmpl = jinja.template_from_str(&template_source).expect("Invalid data type template");

    let rendered = tmpl
        .render(context! { types => type_list.types })
        .expect("Failed to render data type template");

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    fs::write(Path::new(&out_dir).join("generated_data_types.rs"), rendered)
        .expect("Unable to write generated file");

    // Tell cargo to rerun if files change
    println!("cargo:rerun-if-changed=../supported_types.yaml");
    println!("cargo:rerun-if-changed=templates/data_types.jinja");
}
