//! # telem-store 使用案例
//!
//! 演示归档的核心流程：
//!
//! 1. 准备 layout 描述文件与转换表
//! 2. 打开 TableStore
//! 3. 解码原始帧并写入（含重复帧）
//! 4. 点查询 / 区间查询 / 字段序列
//! 5. 重新打开，验证数据从磁盘懒加载

use telem_store::{
    LayoutKind, LayoutSource, RecordKey, StoreConfig, TableStore,
};

const LAYOUT: &str = "\
3,rt,layout
0,LONG,uptimeCopy,4,s,0,Computer,1,1,0,Uptime
1,INT,batteryV,2,V,1,Power,2,1,0,Batt V
2,BYTE,safeMode,1,-,2,Computer,1,2,0,Safe
";

const CONVERSIONS: &str = "\
NONE,NONE,None,0,1,0,0,0,0,-,0,0
BATT,BATT,Battery,0,0.01,0,0,0,0,V,0,1000
FLAG,FLAG,Flag,0,1,0,0,0,0,Boolean,0,1
NOTES:
";

fn main() -> telem_store::Result<()> {
    println!("═══════════════════════════════════════════════════════════");
    println!("   telem-store 演示                                        ");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. 准备描述文件
    // =========================================================================
    let root = std::env::temp_dir().join("telem-store-demo");
    std::fs::create_dir_all(&root)?;
    std::fs::write(root.join("rt.csv"), LAYOUT)?;
    std::fs::write(root.join("coef.csv"), CONVERSIONS)?;
    println!("【1】描述文件写入 {}\n", root.display());

    // =========================================================================
    // 2. 打开 TableStore
    // =========================================================================
    let config = StoreConfig::new(root.join("data"))
        .with_max_segment_records(4)
        .with_layout(LayoutSource::new("rt", root.join("rt.csv"), LayoutKind::Bytes)
            .with_conversions(root.join("coef.csv")));
    let store = TableStore::open(config.clone())?;
    store.delete_table("rt")?;
    println!("【2】打开 TableStore，layouts = {:?}\n", store.layout_names());

    // =========================================================================
    // 3. 解码并写入
    // =========================================================================
    println!("【3】写入 10 帧（第 5 帧重复一次）...");
    let Some(layout) = store.layout("rt") else {
        println!("    layout rt 加载失败: {:?}", store.disabled_layouts());
        return Ok(());
    };
    let codec = store.codec();
    for i in 0..10u32 {
        let uptime = 100 + i * 30;
        let mut raw = uptime.to_le_bytes().to_vec();
        raw.extend_from_slice(&(1180 + i as u16).to_le_bytes());
        raw.push((i % 3 == 0) as u8);

        let rec = codec.decode(&layout, 1, RecordKey::new(0, uptime as i64, 0), &raw)?;
        if i == 5 {
            println!("    重复写入 → accepted = {}", store.add_record(rec.clone())?);
        }
        store.add_record(rec)?;
    }
    println!("    record_count = {}", store.record_count("rt"));
    println!("    segments     = {}\n",
             store.table("rt").map_or(0, |t| t.lock().segment_count()));

    // =========================================================================
    // 4. 查询
    // =========================================================================
    println!("【4】查询 ...");
    if let Some(latest) = store.latest("rt")? {
        println!("    latest   : {}", latest.header_line());
        println!("               {latest}");
    }
    let target = RecordKey::new(0, 205, 0);
    if let Some(r) = store.frame_near("rt", &target, true)? {
        println!("    near {target} (prev) → uptime {}", r.key.uptime);
    }
    for p in store.field_series("rt", "batteryV", &RecordKey::default(), 3, false, true)? {
        println!("    batteryV @ {}/{} = {:.2}", p.resets, p.uptime, p.value);
    }
    for row in store.table_rows("rt", &RecordKey::new(0, 160, 0), 3, false, false)? {
        println!("    row {row:?}");
    }
    println!();

    // =========================================================================
    // 5. 重新打开
    // =========================================================================
    drop(store);
    let store = TableStore::open(config)?;
    println!("【5】重新打开后 record_count = {}", store.record_count("rt"));
    println!("    最新 3 条:");
    for row in store.table_rows("rt", &RecordKey::default(), 3, true, true)? {
        println!("      {row:?}");
    }
    Ok(())
}
