//! Lua scripts executed server-side so multi-key operations stay atomic
//! across every dispatcher sharing the store.

/// KEYS[1] pending set, KEYS[2] active registry
/// ARGV[1] score, ARGV[2] task, ARGV[3] tenant
pub(super) const PUSH: &str = r#"
redis.call("ZADD", KEYS[1], ARGV[1], ARGV[2])
redis.call("ZADD", KEYS[2], "NX", 0, ARGV[3])
return 1
"#;

/// KEYS[1] active registry
/// ARGV[1] pending key prefix (tenant id is appended)
///
/// Returns {"empty", "", ""}, {"retry", tenant, ""} or {"ok", tenant, task}.
pub(super) const POP: &str = r#"
local tenants = redis.call("ZRANGE", KEYS[1], 0, 0)
if #tenants == 0 then
    return {"empty", "", ""}
end
local tenant = tenants[1]
local pending = ARGV[1] .. tenant
local tasks = redis.call("ZRANGE", pending, 0, 0)
if #tasks == 0 then
    redis.call("ZREM", KEYS[1], tenant)
    return {"retry", tenant, ""}
end
redis.call("ZREM", pending, tasks[1])
redis.call("ZINCRBY", KEYS[1], 1, tenant)
return {"ok", tenant, tasks[1]}
"#;

/// KEYS[1] active registry
/// ARGV[1] pending key prefix
pub(super) const SIZE: &str = r#"
local tenants = redis.call("ZRANGE", KEYS[1], 0, -1)
local total = 0
for _, tenant in ipairs(tenants) do
    total = total + redis.call("ZCARD", ARGV[1] .. tenant)
end
return total
"#;

/// KEYS[1] active registry
/// ARGV[1] tenant
pub(super) const RELEASE: &str = r#"
local count = tonumber(redis.call("ZINCRBY", KEYS[1], -1, ARGV[1]))
if count < 0 then
    redis.call("ZADD", KEYS[1], 0, ARGV[1])
    count = 0
end
return count
"#;
