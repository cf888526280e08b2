use serde_json::Value;
use std::path::Path;
use std::process::Command;

fn write_file(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn run(bin: &str, args: &[&str]) -> anyhow::Result<String> {
    let out = Command::new(bin).args(args).env_remove("RUST_LOG").output()?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(String::from_utf8(out.stdout)?)
}

fn run_json(bin: &str, args: &[&str]) -> anyhow::Result<Value> {
    Ok(serde_json::from_str(&run(bin, args)?)?)
}

fn write_fixture(base: &Path) -> anyhow::Result<()> {
    write_file(
        &base.join("deob/Entity.java"),
        r#"package game;

public class Entity {
    protected int x;
    protected int y;

    public int getX() { return x; }
    public int getY() { return y; }
}
"#,
    )?;
    write_file(
        &base.join("deob/Player.java"),
        r#"package game;

public class Player extends Entity {
    private String name;
    private int level;

    public String getName() { return name; }
    public void setLevel(int level) { this.level = level; }
}
"#,
    )?;
    write_file(
        &base.join("obf/ab.bytecode.txt"),
        "Compiled from \"Unknown\"\npublic class ab {\n  protected int a;\n  protected int b;\n  public int a();\n    Code:\n       0: aload_0\n       1: getfield      #2                  // Field a:I\n       4: ireturn\n\n  public int b();\n}\n",
    )?;
    write_file(
        &base.join("obf/cd.bytecode.txt"),
        "public class cd extends ab {\n  private java.lang.String a;\n  private int b;\n  public java.lang.String a();\n  public void a(int);\n}\n",
    )?;
    write_file(&base.join("anchors.json"), r#"{"Entity": "ab"}"#)?;
    Ok(())
}

#[test]
fn map_stats_and_clear_round_trip() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    write_fixture(base.path())?;
    let bin = env!("CARGO_BIN_EXE_class-mapper");
    let db = base.path().join("state/cache.lmdb");
    let db_arg = db.to_string_lossy().to_string();
    let deob = base.path().join("deob").to_string_lossy().to_string();
    let obf = base.path().join("obf").to_string_lossy().to_string();
    let anchors = base.path().join("anchors.json").to_string_lossy().to_string();

    let report = run_json(
        bin,
        &[
            "--db", &db_arg, "--deob", &deob, "--obf", &obf, "--anchors", &anchors, "--format",
            "json", "--workers", "2",
        ],
    )?;
    assert_eq!(report["summary"]["total_matches"], 2);
    assert_eq!(report["summary"]["high_confidence_count"], 2);
    let matches = report["matches"].as_array().unwrap();
    assert_eq!(matches[0]["deobfuscated_class"], "Entity");
    assert_eq!(matches[0]["obfuscated_class"], "ab");
    assert_eq!(matches[0]["confidence_score"], 100.0);
    assert_eq!(matches[1]["deobfuscated_class"], "Player");
    assert_eq!(matches[1]["obfuscated_class"], "cd");
    assert_eq!(matches[1]["details"], "Inherited from anchor class hierarchy");
    assert!(matches[1]["score_breakdown"]["size_penalty"].is_number());

    let stats = run_json(bin, &["--db", &db_arg, "stats"])?;
    assert_eq!(stats["entries"], 4);
    assert_eq!(stats["by_kind"]["java-source-v1"], 2);
    assert_eq!(stats["by_kind"]["javap-text-v1"], 2);

    let csv_path = base.path().join("out/mapping.csv");
    run(
        bin,
        &[
            "--db",
            &db_arg,
            "map",
            "--deob",
            &deob,
            "--obf",
            &obf,
            "--anchors",
            &anchors,
            "-o",
            csv_path.to_string_lossy().as_ref(),
        ],
    )?;
    let csv = std::fs::read_to_string(&csv_path)?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("deobfuscated_name,obfuscated_name,confidence_score"));
    assert!(lines[1].starts_with("Entity,ab,100.00,"));
    assert!(lines[2].starts_with("Player,cd,85.00,"));

    run(bin, &["--db", &db_arg, "clear"])?;
    assert!(!db.exists());
    Ok(())
}

#[test]
fn broken_listing_fails_the_run() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    write_fixture(base.path())?;
    write_file(&base.path().join("obf/zz.bytecode.txt"), "this is not javap output\n")?;
    let bin = env!("CARGO_BIN_EXE_class-mapper");

    let deob = base.path().join("deob").to_string_lossy().to_string();
    let obf = base.path().join("obf").to_string_lossy().to_string();

    let out = Command::new(bin)
        .args(["map", "--no-cache", "--deob", deob.as_str(), "--obf", obf.as_str()])
        .output()?;
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("zz.bytecode.txt"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn threshold_out_of_range_is_rejected() -> anyhow::Result<()> {
    let bin = env!("CARGO_BIN_EXE_class-mapper");
    let out = Command::new(bin)
        .args(["map", "--deob", "a", "--obf", "b", "--threshold", "150"])
        .output()?;
    assert!(!out.status.success());
    Ok(())
}
