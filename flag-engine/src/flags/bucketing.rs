use crate::flags::flag_models::FlagVariant;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;
const BUCKET_COUNT: u32 = 100;

/// Deterministically maps a (flag key, identifier) pair to a bucket in `0..100`.
///
/// FNV-1a over the UTF-16 code units of `"{flag_key}:{identifier}"`, read back as a signed
/// 32 bit value and folded with `abs(hash) % 100`. Buckets computed by browser clients with
/// the same scheme line up with ours, so a user keeps their rollout slot when evaluation
/// moves server side.
///
/// Mixing in the flag key means the same user lands in unrelated buckets for unrelated
/// flags, so two 10% rollouts don't hit the same 10% of users.
pub fn bucket(flag_key: &str, identifier: &str) -> u32 {
    let hash = flag_key
        .encode_utf16()
        .chain(":".encode_utf16())
        .chain(identifier.encode_utf16())
        .fold(FNV_OFFSET_BASIS, |hash, unit| {
            (hash ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
        });

    (hash as i32).unsigned_abs() % BUCKET_COUNT
}

/// Picks a variant by walking cumulative weights against the bucket.
///
/// Returns an empty string when there are no variants. Weight tables that don't cover the
/// whole `0..100` range fall through to the last variant rather than failing.
pub fn assign_variant(flag_key: &str, identifier: &str, variants: &[FlagVariant]) -> String {
    let Some(last) = variants.last() else {
        return String::new();
    };

    let bucket = i64::from(bucket(flag_key, identifier));
    let mut cumulative: i64 = 0;
    for variant in variants {
        cumulative = cumulative.saturating_add(variant.weight);
        if bucket < cumulative {
            return variant.name.clone();
        }
    }

    last.name.clone()
}
