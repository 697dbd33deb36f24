//! # Seed Data Generator
//!
//! Populates a development database with a demo catalog, a handful of shop
//! customers and their credit lines.
//!
//! ## Usage
//! ```bash
//! cargo run -p surtido-db --bin seed
//! cargo run -p surtido-db --bin seed -- --db ./data/surtido.db
//! ```

use std::env;
use surtido_db::{CustomerUpsert, Database, DbConfig, NewProduct};

/// (group, [(code, name, price in pesos, IVA bps)])
const CATALOG: &[(&str, &[(&str, &str, i64, u32)])] = &[
    (
        "Galletería",
        &[
            ("GAL-500", "Galletas de avena 500g", 4_599, 1900),
            ("GAL-250", "Galletas de avena 250g", 2_599, 1900),
            ("WAF-120", "Wafer de chocolate 120g", 1_899, 1900),
        ],
    ),
    (
        "Abarrotes",
        &[
            ("ACE-1L", "Aceite de girasol 1L", 11_900, 500),
            ("ARR-1K", "Arroz blanco 1kg", 4_200, 0),
            ("AZU-1K", "Azúcar refinada 1kg", 4_800, 500),
            ("CAF-250", "Café molido 250g", 9_800, 500),
        ],
    ),
    (
        "Bebidas",
        &[
            ("GAS-1.5", "Gaseosa 1.5L", 4_500, 1900),
            ("AGU-600", "Agua sin gas 600ml", 1_500, 1900),
            ("JUG-1L", "Jugo de naranja 1L", 5_200, 1900),
        ],
    ),
];

/// (identification, name, credit limit in pesos)
const CUSTOMERS: &[(&str, &str, i64)] = &[
    ("900123456", "Tienda La Esquina", 2_000_000),
    ("901555777", "Minimercado El Ahorro", 5_000_000),
    ("1020304050", "Droguería San Jorge", 0),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let mut db_path = "./surtido_dev.db".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Surtido Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./surtido_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Surtido Seed Data Generator");
    println!("===========================");
    println!("Database: {}", db_path);

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected, migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products, skipping seed.", existing);
        return Ok(());
    }

    let mut products = 0;
    for (idx, (group, items)) in CATALOG.iter().enumerate() {
        for (code, name, pesos, bps) in items.iter() {
            let new = NewProduct {
                code: code.to_string(),
                name: name.to_string(),
                description: None,
                group_name: Some(group.to_string()),
                price_cents: pesos * 100,
                tax_rate_bps: *bps,
                track_inventory: true,
                current_stock: 50 + (idx as i64 * 25),
            };
            if let Err(e) = db.products().insert(&new).await {
                eprintln!("Failed to insert {}: {}", code, e);
                continue;
            }
            products += 1;
        }
    }
    println!("✓ {} products", products);

    for (n, (identification, name, limit_pesos)) in CUSTOMERS.iter().enumerate() {
        let (id, _) = db
            .customers()
            .upsert_from_siigo(&CustomerUpsert {
                siigo_id: format!("demo-customer-{}", n + 1),
                identification: identification.to_string(),
                name: name.to_string(),
                email: None,
                phone: None,
                is_active: true,
            })
            .await?;
        db.customers().set_credit_limit(&id, limit_pesos * 100).await?;
    }
    println!("✓ {} customers with credit lines", CUSTOMERS.len());

    println!();
    println!("✓ Seed complete!");
    Ok(())
}
