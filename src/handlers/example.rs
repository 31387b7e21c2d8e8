//! `--example`: writes a sample document.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

pub const EXAMPLE_DOCUMENT: &str = r#"# Example Plainmark Program

This is a simple demonstration of Plainmark.

```plainmark
-- Define variables
local name = "Lua User"
local age = 30

-- Print a greeting
print("Hello, " .. name .. "!")
print("You are " .. age .. " years old.")

-- Define a function
local function calculateArea(radius)
  return 3.14159 * radius * radius
end

local radius = 5
local area = calculateArea(radius)
print(string.format("The area of a circle with radius %d is %.2f", radius, area))
```

Blocks share their variables:

```plainmark
console.log("Area from the previous block: " .. string.format("%.2f", area))

local visits = tonumber(localStorage.getItem("visits") or "0") + 1
localStorage.setItem("visits", tostring(visits))
print("This document ran " .. visits .. " time(s).")
```

```js plainmark
local div = document.createElement("div")
div.textContent = "Built by a script"
div.style.color = "teal"
document.body:appendChild(div)

fs.readFile("testfile.txt", function(err, content)
  if err then
    error(err)
  else
    print("Read: " .. content)
  end
end)

setTimeout(function() print("Timer fired after 200ms") end, 200)
```

This was a demonstration of Plainmark's basic features.
"#;

pub fn write(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("'{}' already exists", path.display());
    }
    fs::write(path, EXAMPLE_DOCUMENT).with_context(|| format!("Failed to write '{}'", path.display()))?;
    println!("Created example file: {}", path.display());
    Ok(())
}
