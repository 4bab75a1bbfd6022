//! Fixtures shared by the integration tests

use std::{fs, path::Path};

use anyhow::Result;
use kiln::config::Config;

/// Relative path of the fixture standard library below a test root
pub const STDLIB_DIR: &str = "python/lib/python3.12";

const STDLIB_FILES: &[(&str, &str)] = &[
    ("os.py", "import abc\nimport sys\nimport stat\nif 'posix' in sys.builtin_module_names:\n    import posixpath as path\nelse:\n    import ntpath as path\n"),
    ("abc.py", "from _abc import get_cache_token\n"),
    ("stat.py", "try:\n    from _stat import *\nexcept ImportError:\n    pass\n"),
    ("posixpath.py", "import os\nimport genericpath\n"),
    ("ntpath.py", "import os\nimport genericpath\n"),
    ("genericpath.py", "import os\n"),
    ("io.py", "import abc\nimport _io\n"),
    ("codecs.py", "import builtins\nimport sys\nfrom _codecs import *\n"),
    ("encodings/__init__.py", "import codecs\nfrom . import aliases\n"),
    ("encodings/aliases.py", "aliases = {}\n"),
    ("encodings/ascii.py", "import codecs\n"),
    ("encodings/cp1252.py", "import codecs\n"),
    ("encodings/latin_1.py", "import codecs\n"),
    ("encodings/utf_8.py", "import codecs\n"),
    ("hashlib.py", "try:\n    import _hashlib\nexcept ImportError:\n    pass\n"),
    ("runpy.py", "import sys\nimport importlib.machinery\n"),
    ("traceback.py", "import sys\n"),
    ("importlib/__init__.py", "import sys\n"),
    ("importlib/machinery.py", "from importlib import _bootstrap_external\n"),
    ("importlib/_bootstrap_external.py", "import _imp\n"),
    ("json/__init__.py", "from .decoder import JSONDecoder\n"),
    ("json/decoder.py", "import re\ntry:\n    from _json import scanstring\nexcept ImportError:\n    scanstring = None\n"),
    ("re.py", "import _sre\n"),
    ("struct.py", "from _struct import *\n"),
    ("platform.py", "import os\nimport sys\n"),
    ("lib-dynload/_struct.cpython-312-x86_64-linux-gnu.so", "\u{7f}ELF struct"),
];

/// Write a small standard library below `root` and point a config at it
pub fn config_with_stdlib(root: &Path) -> Result<Config> {
    let stdlib = root.join(STDLIB_DIR);
    for (relative, contents) in STDLIB_FILES {
        let path = stdlib.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
    }
    Ok(Config {
        stdlib_path: Some(stdlib),
        ..Config::default()
    })
}
