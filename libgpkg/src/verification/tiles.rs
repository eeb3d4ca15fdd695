use crate::{
    geopackage::quote_identifier,
    verification::{
        require, require_level, require_table, verify_table, ColumnDefinition, ForeignKeyDefinition, Rule,
        Severity, TableDefinition, UniqueDefinition, VerificationContext, VerificationLevel,
    },
};

pub(super) const RULES: &[Rule] = &[
    Rule::new(
        "Requirement 35",
        "tile_data of a tile pyramid user table SHALL be PNG or JPEG encoded",
        tile_data_encoding,
    ),
    Rule::new(
        "Requirement 37",
        "A GeoPackage with tiles SHALL include a gpkg_tile_matrix_set table",
        tile_matrix_set_table,
    ),
    Rule::new(
        "Requirement 38",
        "gpkg_tile_matrix_set.table_name SHALL reference a tiles row of gpkg_contents",
        tile_matrix_set_table_names,
    ),
    Rule::new(
        "Requirement 39",
        "gpkg_tile_matrix_set.srs_id SHALL reference gpkg_spatial_ref_sys.srs_id",
        tile_matrix_set_srs_ids,
    ),
    Rule::new(
        "Requirement 41",
        "A GeoPackage with tiles SHALL include a gpkg_tile_matrix table",
        tile_matrix_table,
    ),
    Rule::new(
        "Requirement 42",
        "gpkg_tile_matrix.table_name SHALL reference a tiles row of gpkg_contents",
        tile_matrix_table_names,
    ),
    Rule::new(
        "Requirement 43",
        "gpkg_tile_matrix.zoom_level SHALL NOT be negative",
        zoom_levels_not_negative,
    ),
    Rule::new(
        "Requirement 44",
        "gpkg_tile_matrix.matrix_width SHALL be greater than 0",
        matrix_widths_positive,
    ),
    Rule::new(
        "Requirement 45",
        "gpkg_tile_matrix.matrix_height SHALL be greater than 0",
        matrix_heights_positive,
    ),
    Rule::new(
        "Requirement 46",
        "gpkg_tile_matrix.tile_width SHALL be greater than 0",
        tile_widths_positive,
    ),
    Rule::new(
        "Requirement 47",
        "gpkg_tile_matrix.tile_height SHALL be greater than 0",
        tile_heights_positive,
    ),
    Rule::new(
        "Requirement 48",
        "gpkg_tile_matrix.pixel_x_size SHALL be greater than 0",
        pixel_x_sizes_positive,
    ),
    Rule::new(
        "Requirement 49",
        "gpkg_tile_matrix.pixel_y_size SHALL be greater than 0",
        pixel_y_sizes_positive,
    ),
    Rule::new(
        "Requirement 50",
        "Pixel sizes of a tile set SHALL decrease as zoom_level increases",
        pixel_sizes_decrease,
    ),
    Rule::new(
        "Requirement 51",
        "Every tiles row of gpkg_contents SHALL name a tile pyramid user table of the standard shape",
        tile_pyramid_tables,
    ),
    Rule::new(
        "Requirement 52",
        "zoom_level of a tile SHALL have a gpkg_tile_matrix row",
        tile_zoom_levels,
    ),
    Rule::new(
        "Requirement 53",
        "tile_column of a tile SHALL lie within 0 and matrix_width - 1",
        tile_columns,
    ),
    Rule::new(
        "Requirement 54",
        "tile_row of a tile SHALL lie within 0 and matrix_height - 1",
        tile_rows,
    ),
];

const TILE_MATRIX_SET: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("table_name", "TEXT").not_null().primary_key(),
        ColumnDefinition::new("srs_id", "INTEGER").not_null(),
        ColumnDefinition::new("min_x", "DOUBLE").not_null(),
        ColumnDefinition::new("min_y", "DOUBLE").not_null(),
        ColumnDefinition::new("max_x", "DOUBLE").not_null(),
        ColumnDefinition::new("max_y", "DOUBLE").not_null(),
    ],
    &[
        ForeignKeyDefinition::new("table_name", "gpkg_contents", "table_name"),
        ForeignKeyDefinition::new("srs_id", "gpkg_spatial_ref_sys", "srs_id"),
    ],
    &[],
);

const TILE_MATRIX: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("table_name", "TEXT").not_null().primary_key(),
        ColumnDefinition::new("zoom_level", "INTEGER").not_null().primary_key(),
        ColumnDefinition::new("matrix_width", "INTEGER").not_null(),
        ColumnDefinition::new("matrix_height", "INTEGER").not_null(),
        ColumnDefinition::new("tile_width", "INTEGER").not_null(),
        ColumnDefinition::new("tile_height", "INTEGER").not_null(),
        ColumnDefinition::new("pixel_x_size", "DOUBLE").not_null(),
        ColumnDefinition::new("pixel_y_size", "DOUBLE").not_null(),
    ],
    &[ForeignKeyDefinition::new("table_name", "gpkg_contents", "table_name")],
    &[UniqueDefinition::new(&["table_name", "zoom_level"])],
);

const TILE_PYRAMID: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("id", "INTEGER").primary_key(),
        ColumnDefinition::new("zoom_level", "INTEGER").not_null(),
        ColumnDefinition::new("tile_column", "INTEGER").not_null(),
        ColumnDefinition::new("tile_row", "INTEGER").not_null(),
        ColumnDefinition::new("tile_data", "BLOB").not_null(),
    ],
    &[],
    &[UniqueDefinition::new(&["zoom_level", "tile_column", "tile_row"])],
);

/// Names of the tiles rows of `gpkg_contents` whose table exists
fn tile_tables(context: &VerificationContext<'_>) -> anyhow::Result<Vec<String>> {
    if !context.table_exists("gpkg_contents")? {
        return Ok(Vec::new());
    }
    let mut stmt = context.conn().prepare(
        "SELECT table_name FROM gpkg_contents WHERE data_type = 'tiles' AND lower(table_name) IN (SELECT lower(name) FROM sqlite_master WHERE type IN ('table', 'view')) ORDER BY table_name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(tables)
}

fn require_tiles(context: &VerificationContext<'_>) -> anyhow::Result<Vec<String>> {
    let tables = tile_tables(context)?;
    require(!tables.is_empty(), Severity::Skipped, "no tile sets")?;
    Ok(tables)
}

fn tile_data_encoding(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_level(context, VerificationLevel::Full)?;
    let mut invalid = Vec::new();
    for table in require_tiles(context)? {
        let mut stmt = context.conn().prepare(&format!(
            "SELECT zoom_level, tile_column, tile_row, tile_data FROM {}",
            quote_identifier(&table)
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let data: Vec<u8> = row.get(3)?;
            let encoded = matches!(
                image::guess_format(&data),
                Ok(image::ImageFormat::Png | image::ImageFormat::Jpeg)
            );
            if !encoded {
                invalid.push(format!(
                    "{table} {}/{}/{}",
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?
                ));
            }
        }
    }
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("tiles that are neither PNG nor JPEG: {}", invalid.join(", ")),
    )
}

fn tile_matrix_set_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_tiles(context)?;
    verify_table(context.conn(), "gpkg_tile_matrix_set", &TILE_MATRIX_SET)
}

fn tile_matrix_set_table_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_tile_matrix_set")?;
    require_table(context, "gpkg_contents")?;
    let dangling = context.query_strings(
        "SELECT table_name FROM gpkg_tile_matrix_set WHERE table_name NOT IN (SELECT table_name FROM gpkg_contents WHERE data_type = 'tiles')",
    )?;
    require(
        dangling.is_empty(),
        Severity::Error,
        format!("tile matrix sets without tiles contents: {}", dangling.join(", ")),
    )
}

fn tile_matrix_set_srs_ids(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_tile_matrix_set")?;
    require_table(context, "gpkg_spatial_ref_sys")?;
    let dangling = context.query_strings(
        "SELECT table_name FROM gpkg_tile_matrix_set WHERE srs_id NOT IN (SELECT srs_id FROM gpkg_spatial_ref_sys)",
    )?;
    require(
        dangling.is_empty(),
        Severity::Error,
        format!("tile matrix sets with unknown srs_id: {}", dangling.join(", ")),
    )
}

fn tile_matrix_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_tiles(context)?;
    verify_table(context.conn(), "gpkg_tile_matrix", &TILE_MATRIX)
}

fn tile_matrix_table_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_tile_matrix")?;
    require_table(context, "gpkg_contents")?;
    let dangling = context.query_strings(
        "SELECT DISTINCT table_name FROM gpkg_tile_matrix WHERE table_name NOT IN (SELECT table_name FROM gpkg_contents WHERE data_type = 'tiles')",
    )?;
    require(
        dangling.is_empty(),
        Severity::Error,
        format!("tile matrices without tiles contents: {}", dangling.join(", ")),
    )
}

/// Fails for every tile matrix not satisfying `condition`
fn matrix_condition(context: &VerificationContext<'_>, condition: &str) -> anyhow::Result<()> {
    require_table(context, "gpkg_tile_matrix")?;
    let invalid = context.query_strings(
        &format!(
            "SELECT table_name || ' zoom ' || zoom_level FROM gpkg_tile_matrix WHERE NOT ({condition})"
        ),
    )?;
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("tile matrices violating {condition}: {}", invalid.join(", ")),
    )
}

fn zoom_levels_not_negative(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    matrix_condition(context, "zoom_level >= 0")
}

fn matrix_widths_positive(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    matrix_condition(context, "matrix_width > 0")
}

fn matrix_heights_positive(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    matrix_condition(context, "matrix_height > 0")
}

fn tile_widths_positive(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    matrix_condition(context, "tile_width > 0")
}

fn tile_heights_positive(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    matrix_condition(context, "tile_height > 0")
}

fn pixel_x_sizes_positive(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    matrix_condition(context, "pixel_x_size > 0")
}

fn pixel_y_sizes_positive(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    matrix_condition(context, "pixel_y_size > 0")
}

fn pixel_sizes_decrease(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_tile_matrix")?;
    let invalid = context.query_strings(
        "SELECT coarse.table_name || ' zoom ' || coarse.zoom_level || '/' || fine.zoom_level FROM gpkg_tile_matrix coarse JOIN gpkg_tile_matrix fine ON coarse.table_name = fine.table_name AND coarse.zoom_level < fine.zoom_level WHERE fine.pixel_x_size >= coarse.pixel_x_size OR fine.pixel_y_size >= coarse.pixel_y_size",
    )?;
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("pixel sizes not decreasing: {}", invalid.join(", ")),
    )
}

fn tile_pyramid_tables(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    let mut problems = Vec::new();
    for table in require_tiles(context)? {
        if let Err(e) = verify_table(context.conn(), &table, &TILE_PYRAMID) {
            problems.push(e.to_string());
        }
    }
    require(problems.is_empty(), Severity::Error, problems.join("; "))
}

/// Counts tiles of every tile set for which `condition` holds, joined with their tile matrix as `m`
fn tile_condition(
    context: &VerificationContext<'_>,
    join: &str,
    condition: &str,
    what: &str,
) -> anyhow::Result<()> {
    require_table(context, "gpkg_tile_matrix")?;
    let mut invalid = Vec::new();
    for table in require_tiles(context)? {
        let count: i64 = context.conn().query_row(
            &format!(
                "SELECT count(*) FROM {} t {join} JOIN gpkg_tile_matrix m ON m.table_name = ?1 AND m.zoom_level = t.zoom_level WHERE {condition}",
                quote_identifier(&table)
            ),
            [&table],
            |row| row.get(0),
        )?;
        if count > 0 {
            invalid.push(format!("{table} ({count})"));
        }
    }
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("tiles with {what}: {}", invalid.join(", ")),
    )
}

fn tile_zoom_levels(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    tile_condition(context, "LEFT", "m.zoom_level IS NULL", "a zoom level without tile matrix")
}

fn tile_columns(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    tile_condition(
        context,
        "",
        "t.tile_column < 0 OR t.tile_column >= m.matrix_width",
        "a column outside of the matrix",
    )
}

fn tile_rows(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    tile_condition(
        context,
        "",
        "t.tile_row < 0 OR t.tile_row >= m.matrix_height",
        "a row outside of the matrix",
    )
}
