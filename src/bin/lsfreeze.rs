use lsfreeze::scn::Scn;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "scn" => match args.get(2).map(String::as_str) {
            Some("decode") => cmd_scn_decode(&args[3..]),
            Some("encode") => cmd_scn_encode(&args[3..]),
            Some("from-ts") => cmd_scn_from_ts(&args[3..]),
            Some(other) => Err(format!("unknown scn command: {other}")),
            None => Err("missing scn subcommand".into()),
        },
        other => {
            print_usage();
            Err(format!("unknown top-level command: {other}"))
        }
    }
}

fn cmd_scn_decode(args: &[String]) -> Result<(), String> {
    let (bytes, fixed) = match (
        parse_flag_value(args, "--fixed"),
        parse_flag_value(args, "--var"),
    ) {
        (Some(hex_str), None) => (decode_hex(&hex_str)?, true),
        (None, Some(hex_str)) => (decode_hex(&hex_str)?, false),
        _ => return Err("exactly one of --fixed or --var is required".into()),
    };
    let mut pos = 0;
    let scn = if fixed {
        Scn::decode_fixed(&bytes, &mut pos)
    } else {
        Scn::decode_var(&bytes, &mut pos)
    }
    .map_err(|e| format!("decode scn: {e}"))?;
    if pos != bytes.len() {
        return Err(format!(
            "{} trailing bytes after scn",
            bytes.len().saturating_sub(pos)
        ));
    }
    print_scn(scn);
    Ok(())
}

fn cmd_scn_encode(args: &[String]) -> Result<(), String> {
    let raw = args.first().ok_or("value is required")?;
    let scn = if raw == "invalid" {
        Scn::invalid_scn()
    } else {
        let value = raw
            .parse::<u64>()
            .map_err(|e| format!("parse value {raw}: {e}"))?;
        Scn::from_sql(value).map_err(|e| format!("scn {value}: {e}"))?
    };
    print_scn(scn);
    Ok(())
}

fn cmd_scn_from_ts(args: &[String]) -> Result<(), String> {
    let raw = args.first().ok_or("timestamp in micros is required")?;
    let ts_us = raw
        .parse::<u64>()
        .map_err(|e| format!("parse timestamp {raw}: {e}"))?;
    let scn = Scn::from_timestamp_us(ts_us).map_err(|e| format!("scn from {ts_us}us: {e}"))?;
    print_scn(scn);
    Ok(())
}

fn print_scn(scn: Scn) {
    println!(
        "{}\tvalid={}\ttag={}\tfixed={}\tvar={}",
        scn,
        scn.is_valid(),
        scn.tag(),
        hex::encode(scn.to_fixed_bytes()),
        hex::encode(scn.to_var_bytes())
    );
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, String> {
    let trimmed = raw.trim_start_matches("0x");
    hex::decode(trimmed).map_err(|e| format!("invalid hex {raw}: {e}"))
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}

fn print_usage() {
    eprintln!(
        "usage:\n  lsfreeze scn decode --fixed <hex>\n  lsfreeze scn decode --var <hex>\n  lsfreeze scn encode <value|invalid>\n  lsfreeze scn from-ts <micros>"
    );
}
