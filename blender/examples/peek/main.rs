use blender::models::blend_info::BlendInfo;
use std::path::PathBuf;

/// Peek into the blend file to see what's inside.
fn main() {
    let args = std::env::args().collect::<Vec<String>>();
    let blend_path = match args.get(1) {
        None => PathBuf::from("./examples/assets/test.blend"),
        Some(p) => PathBuf::from(p),
    };

    match BlendInfo::from_path(&blend_path) {
        Ok(info) => match serde_json::to_string_pretty(&info) {
            Ok(json) => println!("{json}"),
            Err(e) => println!("Error: {e:?}"),
        },
        Err(e) => println!("Error: {e:?}"),
    }
}
