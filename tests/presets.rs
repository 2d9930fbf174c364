use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use kumitate::config::{Bundler, Paths, ScriptOptions};
use kumitate::{Config, ConfigError, Preset, RunError, Status, TaskError};

fn project() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

/// Concatenating bundler without post-processing, so nothing shells out.
fn config(root: &Utf8Path) -> Arc<Config> {
    Arc::new(Config {
        root: root.to_path_buf(),
        script: ScriptOptions {
            bundler: Bundler::Concat,
            target: None,
            minify: false,
            ..ScriptOptions::default()
        },
        ..Config::default()
    })
}

fn write(root: &Utf8Path, path: &str, contents: impl AsRef<[u8]>) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn read(root: &Utf8Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

const MAIN_SCSS: &str = "\
@use 'colors';

.nav {
  a {
    color: colors.$accent;
    user-select: none;
  }
}
";

#[tokio::test]
async fn develop_style_is_compiled_prefixed_and_mapped() {
    let (_dir, root) = project();
    write(&root, "src/scss/main.scss", MAIN_SCSS);
    write(&root, "src/scss/_colors.scss", "$accent: red;\n");

    let graph = Preset::Standard.graph(config(&root)).unwrap();
    assert_eq!(graph.run("compile:style").await.unwrap(), Status::Done);

    let css = read(&root, "dist/css/main.css");
    assert!(css.starts_with(".nav a{"), "{css}");
    assert!(css.contains("color:red"));
    assert!(css.contains("-webkit-user-select:none"));
    assert!(css.trim_end().ends_with("/*# sourceMappingURL=main.css.map */"));

    let map: serde_json::Value = serde_json::from_str(&read(&root, "dist/css/main.css.map")).unwrap();
    assert_eq!(map["version"], 3);
    assert_eq!(map["file"], "main.css");
    assert_eq!(map["sources"][0], "src/scss/main.scss");

    // partials are only reachable through imports
    assert!(!root.join("dist/css/_colors.css").exists());
}

#[tokio::test]
async fn build_style_has_no_map() {
    let (_dir, root) = project();
    write(&root, "src/scss/main.scss", MAIN_SCSS);
    write(&root, "src/scss/_colors.scss", "$accent: red;\n");

    let graph = Preset::Standard.graph(config(&root)).unwrap();
    graph.run("build:style").await.unwrap();

    let css = read(&root, "dist/css/main.css");
    assert!(css.contains(".nav a{"));
    assert!(!css.contains("sourceMappingURL"));
    assert!(!root.join("dist/css/main.css.map").exists());
}

#[tokio::test]
async fn style_output_is_stable() {
    let (_dir, root) = project();
    write(&root, "src/scss/main.scss", MAIN_SCSS);
    write(&root, "src/scss/_colors.scss", "$accent: red;\n");

    let graph = Preset::Standard.graph(config(&root)).unwrap();

    graph.run("compile:style").await.unwrap();
    let first = fs::read(root.join("dist/css/main.css")).unwrap();

    graph.run("compile:style").await.unwrap();
    let second = fs::read(root.join("dist/css/main.css")).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn broken_style_degrades() {
    let (_dir, root) = project();
    write(&root, "src/scss/main.scss", ".nav { color: ");

    let graph = Preset::Standard.graph(config(&root)).unwrap();

    assert_eq!(graph.run("compile:style").await.unwrap(), Status::Degraded);
    assert!(!root.join("dist/css/main.css").exists());
}

#[tokio::test]
async fn missing_style_entry_fails() {
    let (_dir, root) = project();

    let graph = Preset::Standard.graph(config(&root)).unwrap();

    let RunError::Failed(failure) = graph.run("compile:style").await.unwrap_err() else {
        panic!("expected a task failure");
    };
    assert_eq!(&*failure.task, "compile:style");
}

#[tokio::test]
async fn concat_scripts_land_in_one_file() {
    let (_dir, root) = project();
    write(&root, "src/js/index.js", "import { greet } from './util.js';\ngreet();\n");
    write(&root, "src/js/util.js", "export function greet() {}\n");

    let graph = Preset::Standard.graph(config(&root)).unwrap();
    graph.run("build:js").await.unwrap();

    let js = read(&root, "dist/js/app.js");
    assert!(js.contains("greet();"));
    assert!(js.contains("export function greet"));
    assert!(!root.join("dist/js/index.js").exists());
}

#[tokio::test]
async fn esbuild_bundles_imports() {
    let available = std::process::Command::new("esbuild")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success());

    if !available {
        eprintln!("esbuild not found, skipping");
        return;
    }

    let (_dir, root) = project();
    write(&root, "src/js/index.js", "import { greet } from './util.js';\ngreet('there');\n");
    write(&root, "src/js/util.js", "export function greet(name) { console.log('hi ' + name); }\n");

    let config = Arc::new(Config {
        root: root.clone(),
        ..Config::default()
    });

    let graph = Preset::Standard.graph(config).unwrap();
    graph.run("build:js").await.unwrap();

    let js = read(&root, "dist/js/app.js");
    assert!(js.contains("hi "));
    assert!(!js.contains("import"));
    assert!(!root.join("dist/js/index.js").exists());
}

#[tokio::test]
async fn build_starts_from_a_clean_output() {
    let (_dir, root) = project();
    write(&root, "dist/stale.txt", "left over");
    write(&root, "dist/css/old.css", "left over");

    write(&root, "src/index.html", "<html>\n  <body>\n    <!-- nav -->\n    <p>hi</p>\n  </body>\n</html>\n");
    write(&root, "src/scss/main.scss", ".a { color: red; }\n");
    write(&root, "src/js/index.js", "run();\n");
    write(&root, "src/fonts/f.woff2", [0u8, 1, 2, 3]);
    fs::create_dir_all(root.join("src/images")).unwrap();
    image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]))
        .save(root.join("src/images/dot.png").as_std_path())
        .unwrap();

    let graph = Preset::Standard.graph(config(&root)).unwrap();
    assert_eq!(graph.run("build").await.unwrap(), Status::Done);

    assert!(!root.join("dist/stale.txt").exists());
    assert!(!root.join("dist/css/old.css").exists());

    assert_eq!(read(&root, "dist/index.html"), "<html>\n<body>\n<p>hi</p>\n</body>\n</html>\n");
    assert!(read(&root, "dist/css/main.css").contains(".a{color:red}"));
    assert_eq!(read(&root, "dist/js/app.js"), "run();\n");
    assert!(root.join("dist/images/dot.png").is_file());
    assert_eq!(fs::read(root.join("dist/fonts/f.woff2")).unwrap(), [0, 1, 2, 3]);
}

#[tokio::test]
async fn clean_without_output_succeeds() {
    let (_dir, root) = project();

    let graph = Preset::Standard.graph(config(&root)).unwrap();

    assert_eq!(graph.run("clean").await.unwrap(), Status::Done);
    assert!(root.join("dist").is_dir());
}

#[tokio::test]
async fn compile_copies_assets_incrementally() {
    let (_dir, root) = project();
    write(&root, "src/index.html", "<p>a</p>");
    write(&root, "src/scss/main.scss", ".a { color: red; }\n");
    write(&root, "src/js/index.js", "run();\n");
    write(&root, "src/fonts/f.woff2", "font");

    let graph = Preset::Standard.graph(config(&root)).unwrap();
    graph.run("compile").await.unwrap();

    assert_eq!(read(&root, "dist/index.html"), "<p>a</p>");
    assert_eq!(read(&root, "dist/fonts/f.woff2"), "font");
    assert!(root.join("dist/js/app.js.map").is_file());

    // the output is newer now, so an edit to the copy survives the next run
    write(&root, "dist/fonts/f.woff2", "kept");
    graph.run("compile:fonts").await.unwrap();
    assert_eq!(read(&root, "dist/fonts/f.woff2"), "kept");
}

#[tokio::test]
async fn cycle_stops_build_before_cleaning() {
    let (_dir, root) = project();
    write(&root, "dist/keep.txt", "still here");

    let mut bp = Preset::Standard.blueprint(config(&root)).unwrap();
    bp.register("ping", &["pong"], |_| async { Ok::<_, TaskError>(Status::Done) }).unwrap();
    bp.register("pong", &["ping"], |_| async { Ok::<_, TaskError>(Status::Done) }).unwrap();
    let graph = bp.finish().unwrap();

    assert!(matches!(graph.run("build").await, Err(RunError::Config(ConfigError::Cycle(_)))));
    assert!(matches!(graph.plan("build"), Err(ConfigError::Cycle(_))));
    assert_eq!(read(&root, "dist/keep.txt"), "still here");
}

#[test]
fn graph_renders_as_mermaid() {
    let graph = Preset::Standard.graph(Arc::new(Config::default())).unwrap();
    let diagram = graph.to_string();

    assert!(diagram.starts_with("graph LR"));
    assert!(diagram.contains("\"build:style\""));
}

#[tokio::test]
async fn classic_default_builds_everything() {
    let (_dir, root) = project();
    write(&root, "src/index.html", "<p>home</p>");
    write(&root, "src/blog/post.html", "<p>post</p>");
    write(&root, "src/style/a.scss", ".a { b { color: red; } }\n");
    write(&root, "src/style/b.scss", ".c { color: blue; }\n");
    write(&root, "src/js/one.js", "one();");
    write(&root, "src/js/two.js", "two();");
    write(&root, "resources/img/logo.svg", "<svg/>");

    let graph = Preset::Classic.graph(config(&root)).unwrap();
    assert_eq!(graph.run("default").await.unwrap(), Status::Done);

    assert_eq!(read(&root, "dist/index.html"), "<p>home</p>");
    assert_eq!(read(&root, "dist/blog/post.html"), "<p>post</p>");

    let css = read(&root, "dist/style.css");
    assert!(css.contains(".a b{color:red}"));
    assert!(css.contains(".c{color:blue}"));

    assert_eq!(read(&root, "dist/scripts.js"), "one();\ntwo();");
    assert_eq!(read(&root, "dist/resources/img/logo.svg"), "<svg/>");
}

#[tokio::test]
async fn classic_deploy_needs_a_target() {
    let (_dir, root) = project();

    let graph = Preset::Classic.graph(config(&root)).unwrap();

    let RunError::Failed(failure) = graph.run("deploy").await.unwrap_err() else {
        panic!("expected a task failure");
    };
    assert!(matches!(
        &*failure.error,
        TaskError::Config(ConfigError::MissingPath("paths.deploy"))
    ));
}

#[tokio::test]
async fn classic_deploy_mirrors_output() {
    let (_dir, scratch) = project();
    let root = scratch.join("project");
    write(&root, "dist/index.html", "<p>home</p>");
    write(&root, "dist/resources/a.txt", "a");

    let config = Arc::new(Config {
        root: root.clone(),
        paths: Paths {
            deploy: Some("../site".into()),
            ..Paths::default()
        },
        ..Config::default()
    });

    let graph = Preset::Classic.graph(config).unwrap();
    graph.run("deploy").await.unwrap();

    let site = scratch.join("site");
    assert_eq!(fs::read_to_string(site.join("index.html")).unwrap(), "<p>home</p>");
    assert_eq!(fs::read_to_string(site.join("resources/a.txt")).unwrap(), "a");
}
